//! Outbound notifications

use serde::{Deserialize, Serialize};

/// Name under which inbound endpoint data is published
pub const USB_DATA_EVENT: &str = "usbData";

/// Notification published to the host application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UsbEvent {
    /// One successful read cycle; payload is upper-case hex
    Data { payload: String },
}

impl UsbEvent {
    /// Name the host application subscribes to
    pub fn name(&self) -> &'static str {
        match self {
            UsbEvent::Data { .. } => USB_DATA_EVENT,
        }
    }
}
