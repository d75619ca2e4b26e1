//! Test utilities for usb-link
//!
//! Descriptor builders and async helpers shared by unit and integration tests.
//!
//! # Example
//!
//! ```
//! use common::test_utils::create_interrupt_device;
//!
//! let device = create_interrupt_device(0x04d8, 0x00df);
//! assert_eq!(device.interface_count(), 1);
//! assert_eq!(device.interfaces[0].endpoints.len(), 2);
//! ```

use protocol::{DeviceDescriptor, EndpointDescriptor, InterfaceDescriptor};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Max packet size used by the mock endpoints
pub const MOCK_PACKET_SIZE: u16 = 64;

/// Create a device with a single interface holding the given endpoints
pub fn create_device_with_endpoints(
    vendor_id: u16,
    product_id: u16,
    endpoints: Vec<EndpointDescriptor>,
) -> DeviceDescriptor {
    create_device_with_interfaces(
        vendor_id,
        product_id,
        vec![InterfaceDescriptor {
            number: 0,
            endpoints,
        }],
    )
}

/// Create a device with arbitrary interfaces
pub fn create_device_with_interfaces(
    vendor_id: u16,
    product_id: u16,
    interfaces: Vec<InterfaceDescriptor>,
) -> DeviceDescriptor {
    DeviceDescriptor {
        vendor_id,
        product_id,
        bus_number: 1,
        address: (product_id % 128) as u8,
        interfaces,
    }
}

/// Create a well-formed device: one interface, interrupt IN then interrupt OUT
pub fn create_interrupt_device(vendor_id: u16, product_id: u16) -> DeviceDescriptor {
    create_device_with_endpoints(
        vendor_id,
        product_id,
        vec![
            EndpointDescriptor::interrupt_in(1, MOCK_PACKET_SIZE),
            EndpointDescriptor::interrupt_out(1, MOCK_PACKET_SIZE),
        ],
    )
}

/// Await `future`, failing with [`Elapsed`] after `duration`
///
/// ```
/// use common::test_utils::{DEFAULT_TEST_TIMEOUT, with_timeout};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// assert_eq!(with_timeout(DEFAULT_TEST_TIMEOUT, async { 7 }).await.unwrap(), 7);
/// # }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, Elapsed>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| Elapsed(duration))
}

/// A [`with_timeout`] deadline passed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("gave up after {0:?}")]
pub struct Elapsed(pub Duration);
