//! libusb platform backend
//!
//! Enumerates devices through rusb, decides access with a trial open and
//! performs endpoint I/O on a claimed interface.

use crate::usb::platform::{
    Connection, PermissionGrant, PermissionRequest, Platform, PlatformError, TransferError,
};
use protocol::{
    DeviceDescriptor, Direction, EndpointDescriptor, InterfaceDescriptor, RequestId, TransferKind,
};
use rusb::{Context, Device, DeviceHandle, UsbContext};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Default bound on a queued OUT transfer
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Platform backed by a libusb context
pub struct RusbPlatform {
    context: Context,
    write_timeout: Duration,
}

impl RusbPlatform {
    /// Create a new libusb context
    pub fn new(write_timeout: Duration) -> Result<Self, rusb::Error> {
        Ok(Self {
            context: Context::new()?,
            write_timeout,
        })
    }

    /// Locate the live device behind a descriptor snapshot
    fn find(
        context: &Context,
        descriptor: &DeviceDescriptor,
    ) -> Result<Device<Context>, PlatformError> {
        let devices = context
            .devices()
            .map_err(|e| PlatformError::Unavailable(e.to_string()))?;

        devices
            .iter()
            .find(|device| {
                device.bus_number() == descriptor.bus_number
                    && device.address() == descriptor.address
                    && device.device_descriptor().is_ok_and(|d| {
                        d.vendor_id() == descriptor.vendor_id
                            && d.product_id() == descriptor.product_id
                    })
            })
            .ok_or_else(|| PlatformError::NotAttached(descriptor.to_string()))
    }
}

impl Platform for RusbPlatform {
    fn devices(&self) -> Result<Vec<DeviceDescriptor>, PlatformError> {
        let devices = self
            .context
            .devices()
            .map_err(|e| PlatformError::Unavailable(e.to_string()))?;

        let mut descriptors = Vec::with_capacity(devices.len());
        for device in devices.iter() {
            match describe(&device) {
                Ok(descriptor) => descriptors.push(descriptor),
                Err(e) => debug!(
                    "Skipping device bus={} addr={}: {}",
                    device.bus_number(),
                    device.address(),
                    e
                ),
            }
        }

        debug!("Enumerated {} devices", descriptors.len());
        Ok(descriptors)
    }

    fn request_permission(&self, device: &DeviceDescriptor) -> PermissionRequest {
        let (tx, rx) = oneshot::channel();
        let context = self.context.clone();
        let descriptor = device.clone();

        // libusb has no permission broker; a trial open answers the question.
        // If the thread cannot be spawned the sender is dropped, which the
        // caller reads as a denial.
        let spawned = std::thread::Builder::new()
            .name("usb-permission".to_string())
            .spawn(move || {
                let grant = match Self::find(&context, &descriptor) {
                    Ok(device) => match device.open() {
                        Ok(_handle) => PermissionGrant::granted(descriptor),
                        Err(rusb::Error::NoDevice) | Err(rusb::Error::NotFound) => {
                            PermissionGrant {
                                granted: true,
                                device: None,
                            }
                        }
                        Err(e) => {
                            warn!("Trial open of {} failed: {}", descriptor, e);
                            PermissionGrant::denied(Some(descriptor))
                        }
                    },
                    Err(e) => {
                        warn!("{}", e);
                        PermissionGrant {
                            granted: true,
                            device: None,
                        }
                    }
                };
                let _ = tx.send(grant);
            });

        if let Err(e) = spawned {
            warn!("Failed to spawn permission check: {}", e);
        }
        rx
    }

    fn open(&self, descriptor: &DeviceDescriptor) -> Result<Box<dyn Connection>, PlatformError> {
        let device = Self::find(&self.context, descriptor)?;
        let interface = descriptor
            .interfaces
            .first()
            .map(|i| i.number)
            .unwrap_or(0);

        let handle = device.open().map_err(|e| {
            warn!("Failed to open device: {}", e);
            PlatformError::Open(e.to_string())
        })?;
        debug!("Opened device {}", descriptor);

        let detached = claim(&handle, interface)?;
        debug!("Claimed interface {} on device {}", interface, descriptor);

        Ok(Box::new(RusbConnection {
            handle: Some(handle),
            interface,
            detached,
            write_timeout: self.write_timeout,
            next_id: 1,
            completions: VecDeque::new(),
        }))
    }
}

/// Snapshot a device's descriptors
fn describe(device: &Device<Context>) -> Result<DeviceDescriptor, rusb::Error> {
    let descriptor = device.device_descriptor()?;
    let config = device.active_config_descriptor()?;

    let interfaces = config
        .interfaces()
        .map(|interface| InterfaceDescriptor {
            number: interface.number(),
            endpoints: interface
                .descriptors()
                .next()
                .map(|alt| {
                    alt.endpoint_descriptors()
                        .map(|ep| map_endpoint(&ep))
                        .collect()
                })
                .unwrap_or_default(),
        })
        .collect();

    Ok(DeviceDescriptor {
        vendor_id: descriptor.vendor_id(),
        product_id: descriptor.product_id(),
        bus_number: device.bus_number(),
        address: device.address(),
        interfaces,
    })
}

fn map_endpoint(endpoint: &rusb::EndpointDescriptor<'_>) -> EndpointDescriptor {
    EndpointDescriptor {
        address: endpoint.address(),
        direction: Direction::from_address(endpoint.address()),
        kind: map_transfer_type(endpoint.transfer_type()),
        max_packet_size: endpoint.max_packet_size(),
    }
}

fn map_transfer_type(kind: rusb::TransferType) -> TransferKind {
    match kind {
        rusb::TransferType::Control => TransferKind::Control,
        rusb::TransferType::Isochronous => TransferKind::Isochronous,
        rusb::TransferType::Bulk => TransferKind::Bulk,
        rusb::TransferType::Interrupt => TransferKind::Interrupt,
    }
}

/// Kernel driver handoff and interface claiming on an open handle
trait InterfaceControl {
    fn kernel_driver_active(&self, interface: u8) -> rusb::Result<bool>;
    fn detach_kernel_driver(&self, interface: u8) -> rusb::Result<()>;
    fn attach_kernel_driver(&self, interface: u8) -> rusb::Result<()>;
    fn claim_interface(&self, interface: u8) -> rusb::Result<()>;
    fn release_interface(&self, interface: u8) -> rusb::Result<()>;
}

impl InterfaceControl for DeviceHandle<Context> {
    fn kernel_driver_active(&self, interface: u8) -> rusb::Result<bool> {
        DeviceHandle::kernel_driver_active(self, interface)
    }

    fn detach_kernel_driver(&self, interface: u8) -> rusb::Result<()> {
        DeviceHandle::detach_kernel_driver(self, interface)
    }

    fn attach_kernel_driver(&self, interface: u8) -> rusb::Result<()> {
        DeviceHandle::attach_kernel_driver(self, interface)
    }

    fn claim_interface(&self, interface: u8) -> rusb::Result<()> {
        DeviceHandle::claim_interface(self, interface)
    }

    fn release_interface(&self, interface: u8) -> rusb::Result<()> {
        DeviceHandle::release_interface(self, interface)
    }
}

/// Detach any kernel driver and claim `interface`
///
/// Returns whether a driver was detached. On a failed claim the driver is
/// handed back before returning.
fn claim(handle: &impl InterfaceControl, interface: u8) -> Result<bool, PlatformError> {
    let detached = match handle.kernel_driver_active(interface) {
        Ok(true) => {
            debug!("Detaching kernel driver from interface {}", interface);
            match handle.detach_kernel_driver(interface) {
                Ok(()) => true,
                Err(e) => {
                    warn!(
                        "Failed to detach kernel driver from interface {}: {}",
                        interface, e
                    );
                    false
                }
            }
        }
        Ok(false) => false,
        Err(e) => {
            debug!(
                "Could not check kernel driver status for interface {}: {}",
                interface, e
            );
            false
        }
    };

    if let Err(e) = handle.claim_interface(interface) {
        if detached {
            reattach_kernel_driver(handle, interface);
        }
        return Err(PlatformError::Claim {
            interface,
            message: e.to_string(),
        });
    }

    Ok(detached)
}

/// Release `interface`, reattaching the kernel driver only if `open` detached one
fn release(handle: &impl InterfaceControl, interface: u8, detached: bool) {
    if let Err(e) = handle.release_interface(interface) {
        warn!("Failed to release interface {}: {}", interface, e);
    }
    if detached {
        reattach_kernel_driver(handle, interface);
    }
}

fn reattach_kernel_driver(handle: &impl InterfaceControl, interface: u8) {
    if let Err(e) = handle.attach_kernel_driver(interface) {
        warn!(
            "Could not reattach kernel driver to interface {}: {}",
            interface, e
        );
    }
}

/// Map rusb::Error to TransferError
pub fn map_rusb_error(err: rusb::Error) -> TransferError {
    match err {
        rusb::Error::Timeout => TransferError::Timeout,
        rusb::Error::Pipe => TransferError::Pipe,
        rusb::Error::NoDevice => TransferError::NoDevice,
        rusb::Error::Busy => TransferError::Busy,
        rusb::Error::Overflow => TransferError::Overflow,
        rusb::Error::Io => TransferError::Io,
        rusb::Error::InvalidParam => TransferError::InvalidParam,
        rusb::Error::Access => TransferError::Access,
        _ => TransferError::Other(err.to_string()),
    }
}

/// Open device with its interface claimed
///
/// libusb's synchronous API completes an OUT transfer inside `submit`; the
/// outcome is queued and handed back by `wait` in submission order.
struct RusbConnection {
    handle: Option<DeviceHandle<Context>>,
    interface: u8,
    /// A kernel driver was detached from `interface` on open
    detached: bool,
    write_timeout: Duration,
    next_id: u64,
    completions: VecDeque<(RequestId, Result<(), TransferError>)>,
}

impl RusbConnection {
    fn handle(&self) -> Result<&DeviceHandle<Context>, TransferError> {
        self.handle.as_ref().ok_or(TransferError::NoDevice)
    }
}

impl Connection for RusbConnection {
    fn read(
        &mut self,
        endpoint: &EndpointDescriptor,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransferError> {
        self.handle()?
            .read_interrupt(endpoint.address, buf, timeout)
            .map_err(map_rusb_error)
    }

    fn submit(
        &mut self,
        endpoint: &EndpointDescriptor,
        buf: &[u8],
    ) -> Result<RequestId, TransferError> {
        let result = self
            .handle()?
            .write_interrupt(endpoint.address, buf, self.write_timeout);

        let outcome = match result {
            Ok(_len) => Ok(()),
            // Not accepted by libusb at all
            Err(
                e @ (rusb::Error::InvalidParam | rusb::Error::NoDevice | rusb::Error::NotSupported),
            ) => return Err(TransferError::Rejected(e.to_string())),
            Err(e) => Err(map_rusb_error(e)),
        };

        let id = RequestId(self.next_id);
        self.next_id += 1;
        self.completions.push_back((id, outcome));
        Ok(id)
    }

    fn wait(&mut self) -> Result<RequestId, TransferError> {
        match self.completions.pop_front() {
            Some((id, outcome)) => outcome.map(|()| id),
            None => Err(TransferError::Other("no request queued".to_string())),
        }
    }

    fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            release(&handle, self.interface, self.detached);
            self.completions.clear();
            debug!("Closed device interface {}", self.interface);
        }
    }
}
