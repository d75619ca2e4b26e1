//! usb-link host
//!
//! Connects to a USB peripheral with a single interrupt IN/OUT interface pair,
//! publishes inbound reports as hex `usbData` events and writes hex payloads
//! back to the device.

pub mod config;
pub mod link;
pub mod usb;

pub use config::LinkConfig;
pub use link::UsbLink;
pub use usb::{ConnectionManager, LinkState, Platform};
