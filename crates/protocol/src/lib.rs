//! Data types shared by the USB link host and its callers
//!
//! This crate holds everything a caller can observe without touching a
//! device: descriptor snapshots, the hex framing used on the event and write
//! paths, the `usbData` notification, and the coded error types.
//!
//! # Example
//!
//! ```
//! use protocol::{decode_hex, encode_hex};
//!
//! let hex = encode_hex(&[0xde, 0xad]);
//! assert_eq!(hex, "DEAD");
//! assert_eq!(decode_hex(&hex).unwrap(), vec![0xde, 0xad]);
//! ```

pub mod codec;
pub mod error;
pub mod event;
pub mod types;

pub use codec::{decode_hex, encode_hex};
pub use error::{CodecError, ConnectError, DisconnectError, ValidationError, WriteError};
pub use event::{USB_DATA_EVENT, UsbEvent};
pub use types::{
    DeviceDescriptor, Direction, EndpointDescriptor, InterfaceDescriptor, RequestId, TransferKind,
};
