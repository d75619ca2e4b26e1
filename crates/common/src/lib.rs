//! Common utilities for usb-link
//!
//! This crate provides shared plumbing for the host crate and its tests:
//! error handling, logging setup, the event channel that carries `usbData`
//! notifications to the host application, and test helpers.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;

pub use channel::{EventPublisher, EventSubscriber, create_event_channel};
pub use error::{Error, Result};
pub use logging::setup_logging;
