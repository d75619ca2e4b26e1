//! Device selection by VID/PID

use protocol::DeviceDescriptor;
use tracing::debug;

/// Find the device carrying `vendor_id`/`product_id`
///
/// The whole list is scanned. When several devices share the pair, the last
/// one in enumeration order wins; there is no further tie-break.
pub fn find_device(
    devices: &[DeviceDescriptor],
    vendor_id: u16,
    product_id: u16,
) -> Option<DeviceDescriptor> {
    let mut found = None;

    for device in devices {
        if device.matches(vendor_id, product_id) {
            if let Some(previous) = &found {
                debug!("Device {} supersedes earlier match {}", device, previous);
            }
            found = Some(device);
        }
    }

    found.cloned()
}
