//! USB subsystem
//!
//! Connects to a device exposing one interface with an interrupt IN and an
//! interrupt OUT endpoint, and moves hex-framed data across it:
//! - Device selection by VID/PID and endpoint layout validation
//! - The permission handshake and open/claim sequence
//! - A background reader publishing inbound reports
//! - Writes serialized against the reader
//!
//! Endpoint I/O is blocking and runs on a dedicated reader thread or on
//! Tokio's blocking pool, never on the async executor itself.

pub mod device;
pub mod manager;
pub mod matcher;
pub mod mock;
pub mod platform;
pub mod reader;
pub mod validator;
pub mod writer;

// Re-export public types
pub use device::RusbPlatform;
pub use manager::{ConnectionManager, LinkState};
pub use matcher::find_device;
pub use mock::{MockPlatform, PermissionScript};
pub use platform::{
    Connection, PermissionGrant, PermissionRequest, Platform, PlatformError, TransferError,
};
pub use reader::ReaderSettings;
pub use validator::{Endpoints, validate};
