//! Platform capability consumed by the connection core
//!
//! The platform enumerates attached devices, decides whether the process may
//! access one, and opens a device with its single interface claimed. Once
//! open, a [`Connection`] performs the endpoint I/O.

use protocol::{DeviceDescriptor, EndpointDescriptor, RequestId};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

/// Result of a permission request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionGrant {
    /// Whether access was granted
    pub granted: bool,
    /// Device the decision applies to, as reported by the platform
    pub device: Option<DeviceDescriptor>,
}

impl PermissionGrant {
    pub fn granted(device: DeviceDescriptor) -> Self {
        Self {
            granted: true,
            device: Some(device),
        }
    }

    pub fn denied(device: Option<DeviceDescriptor>) -> Self {
        Self {
            granted: false,
            device,
        }
    }
}

/// Pending permission decision
///
/// Resolves once the platform decides. A platform that drops the sending
/// half without answering is treated as having denied access.
pub type PermissionRequest = oneshot::Receiver<PermissionGrant>;

/// Errors raised by the platform itself
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("USB service unavailable: {0}")]
    Unavailable(String),

    #[error("Device {0} is no longer attached")]
    NotAttached(String),

    #[error("Failed to open device: {0}")]
    Open(String),

    #[error("Failed to claim interface {interface}: {message}")]
    Claim { interface: u8, message: String },
}

/// Errors from a single transfer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("transfer timed out")]
    Timeout,

    #[error("endpoint stalled")]
    Pipe,

    #[error("device disconnected")]
    NoDevice,

    #[error("device busy")]
    Busy,

    #[error("transfer overflow")]
    Overflow,

    #[error("I/O error")]
    Io,

    #[error("invalid parameter")]
    InvalidParam,

    #[error("access denied")]
    Access,

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("{0}")]
    Other(String),
}

/// An open device with its interface claimed
pub trait Connection: Send {
    /// Bounded-timeout read from an IN endpoint; returns the number of bytes
    /// actually received into `buf`
    fn read(
        &mut self,
        endpoint: &EndpointDescriptor,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransferError>;

    /// Queue an OUT transfer; an `Err` means the request was not accepted
    fn submit(
        &mut self,
        endpoint: &EndpointDescriptor,
        buf: &[u8],
    ) -> Result<RequestId, TransferError>;

    /// Wait for the next queued request to complete
    fn wait(&mut self) -> Result<RequestId, TransferError>;

    /// Release the claimed interface
    fn close(&mut self);
}

/// Device enumeration and access broker
pub trait Platform: Send + Sync + 'static {
    /// Snapshot of the attached devices
    ///
    /// `Err` means enumeration itself is unavailable.
    fn devices(&self) -> Result<Vec<DeviceDescriptor>, PlatformError>;

    /// Ask for access to a device
    fn request_permission(&self, device: &DeviceDescriptor) -> PermissionRequest;

    /// Open a device and claim its interface
    fn open(&self, device: &DeviceDescriptor) -> Result<Box<dyn Connection>, PlatformError>;
}
