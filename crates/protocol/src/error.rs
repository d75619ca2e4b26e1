//! Caller-facing error types
//!
//! Every error a caller can observe carries a stable code (`E1xx` for the
//! connect handshake, `E2xx` for writes, `E4xx` for disconnect) alongside its
//! human-readable message.

use thiserror::Error;

/// Malformed hex payload
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("odd number of hex digits ({length})")]
    OddLength { length: usize },

    #[error("invalid hex character {character:?} at index {index}")]
    InvalidCharacter { character: char, index: usize },

    #[error("{0}")]
    Malformed(String),
}

/// Endpoint layout rejected during validation
///
/// Checks run in a fixed order and only the first violation is reported.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Could not find device interface")]
    WrongInterfaceCount { count: usize },

    #[error("Could not find device endpoints")]
    WrongEndpointCount { count: usize },

    #[error("First endpoint is not interrupt type")]
    FirstEndpointWrongType,

    #[error("First endpoint direction is not in")]
    FirstEndpointWrongDirection,

    #[error("Second endpoint is not interrupt type")]
    SecondEndpointWrongType,

    #[error("Second endpoint direction is not out")]
    SecondEndpointWrongDirection,
}

impl ValidationError {
    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::WrongInterfaceCount { .. } => "E103",
            ValidationError::WrongEndpointCount { .. } => "E104",
            ValidationError::FirstEndpointWrongType => "E105",
            ValidationError::FirstEndpointWrongDirection => "E106",
            ValidationError::SecondEndpointWrongType => "E107",
            ValidationError::SecondEndpointWrongDirection => "E108",
        }
    }
}

/// Outcome of a failed connect attempt
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("No USB device found matching vendor ID {vendor_id} and product ID {product_id}")]
    NoDeviceFound { vendor_id: u16, product_id: u16 },

    #[error("Device is null")]
    NullDevice,

    #[error("Permission denied for device")]
    PermissionDenied,

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("Failed opening USB device")]
    OpenFailed,

    #[error("No USB devices found")]
    NoDevicesAvailable,

    #[error("A USB connect attempt is already in progress")]
    ConnectPending,

    #[error("A USB connection is already established")]
    AlreadyConnected,

    #[error("USB connect attempt was abandoned")]
    Aborted,
}

impl ConnectError {
    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            ConnectError::NoDeviceFound { .. } => "E100",
            ConnectError::NullDevice => "E101",
            ConnectError::PermissionDenied => "E102",
            ConnectError::Invalid(e) => e.code(),
            ConnectError::OpenFailed => "E109",
            ConnectError::NoDevicesAvailable => "E110",
            ConnectError::ConnectPending => "E111",
            ConnectError::AlreadyConnected => "E112",
            ConnectError::Aborted => "E113",
        }
    }
}

/// Outcome of a failed write
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WriteError {
    #[error("No USB connection established")]
    NotConnected,

    #[error("Write request queue failed")]
    QueueFailed,

    #[error("Write failed: {0}")]
    Failed(String),

    #[error("Invalid hex payload: {0}")]
    InvalidHex(#[from] CodecError),
}

impl WriteError {
    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            WriteError::NotConnected => "E200",
            WriteError::QueueFailed => "E201",
            WriteError::Failed(_) => "E202",
            WriteError::InvalidHex(_) => "E203",
        }
    }
}

/// Outcome of a failed disconnect
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum DisconnectError {
    #[error("No USB connection established")]
    NotConnected,

    #[error("Disconnect was abandoned before it completed")]
    Aborted,
}

impl DisconnectError {
    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            DisconnectError::NotConnected => "E400",
            DisconnectError::Aborted => "E401",
        }
    }
}
