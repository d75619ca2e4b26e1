//! USB descriptor type definitions
//!
//! Immutable snapshots of a device, its interfaces and their endpoints, taken
//! at enumeration time. The connection core only ever reads these.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Endpoint direction, seen from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Device to host
    In,
    /// Host to device
    Out,
}

impl Direction {
    /// Direction encoded in bit 7 of an endpoint address
    pub fn from_address(address: u8) -> Self {
        if address & 0x80 != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }
}

/// Endpoint transfer type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// Endpoint descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    /// Endpoint address (includes direction bit)
    pub address: u8,
    /// Transfer direction
    pub direction: Direction,
    /// Transfer type
    pub kind: TransferKind,
    /// Maximum packet size in bytes
    pub max_packet_size: u16,
}

impl EndpointDescriptor {
    /// Interrupt IN endpoint with the given address number
    pub fn interrupt_in(number: u8, max_packet_size: u16) -> Self {
        Self {
            address: 0x80 | (number & 0x0f),
            direction: Direction::In,
            kind: TransferKind::Interrupt,
            max_packet_size,
        }
    }

    /// Interrupt OUT endpoint with the given address number
    pub fn interrupt_out(number: u8, max_packet_size: u16) -> Self {
        Self {
            address: number & 0x0f,
            direction: Direction::Out,
            kind: TransferKind::Interrupt,
            max_packet_size,
        }
    }

    /// Same endpoint with a different transfer type
    pub fn with_kind(mut self, kind: TransferKind) -> Self {
        self.kind = kind;
        self
    }

    /// Same endpoint with a different direction (address bit 7 follows)
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self.address = match direction {
            Direction::In => self.address | 0x80,
            Direction::Out => self.address & 0x7f,
        };
        self
    }
}

/// Interface descriptor (first alternate setting only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceDescriptor {
    /// bInterfaceNumber
    pub number: u8,
    /// Endpoints in descriptor order
    pub endpoints: Vec<EndpointDescriptor>,
}

/// Physical USB device as seen at enumeration time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// Bus number
    pub bus_number: u8,
    /// Device address on the bus
    pub address: u8,
    /// Interfaces of the active configuration
    pub interfaces: Vec<InterfaceDescriptor>,
}

impl DeviceDescriptor {
    /// Number of interfaces in the active configuration
    pub fn interface_count(&self) -> usize {
        self.interfaces.len()
    }

    /// True if this device carries the given VID/PID pair
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} (bus {:03} addr {:03})",
            self.vendor_id, self.product_id, self.bus_number, self.address
        )
    }
}

/// Identifier of one submitted transfer request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);
