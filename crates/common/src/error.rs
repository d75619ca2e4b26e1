//! Errors from the shared plumbing

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Event channel full, dropped {event} event")]
    ChannelFull { event: &'static str },

    #[error("Event channel closed")]
    ChannelClosed,

    #[error("Invalid log filter: {0}")]
    LogFilter(String),

    #[error("Failed to install log subscriber: {0}")]
    LogInit(String),
}

pub type Result<T> = std::result::Result<T, Error>;
