//! Endpoint layout validation
//!
//! A supported device exposes exactly one interface with exactly two
//! endpoints: interrupt IN first, interrupt OUT second. Checks run in that
//! order and stop at the first violation.

use protocol::{DeviceDescriptor, Direction, EndpointDescriptor, TransferKind, ValidationError};

/// The validated endpoint pair of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoints {
    /// Interrupt IN endpoint (device to host)
    pub input: EndpointDescriptor,
    /// Interrupt OUT endpoint (host to device)
    pub output: EndpointDescriptor,
}

/// Check a device's endpoint layout
pub fn validate(device: &DeviceDescriptor) -> Result<Endpoints, ValidationError> {
    let [interface] = device.interfaces.as_slice() else {
        return Err(ValidationError::WrongInterfaceCount {
            count: device.interface_count(),
        });
    };

    let [input, output] = interface.endpoints.as_slice() else {
        return Err(ValidationError::WrongEndpointCount {
            count: interface.endpoints.len(),
        });
    };

    if input.kind != TransferKind::Interrupt {
        return Err(ValidationError::FirstEndpointWrongType);
    }
    if input.direction != Direction::In {
        return Err(ValidationError::FirstEndpointWrongDirection);
    }

    if output.kind != TransferKind::Interrupt {
        return Err(ValidationError::SecondEndpointWrongType);
    }
    if output.direction != Direction::Out {
        return Err(ValidationError::SecondEndpointWrongDirection);
    }

    Ok(Endpoints {
        input: *input,
        output: *output,
    })
}
