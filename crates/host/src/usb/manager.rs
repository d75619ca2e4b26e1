//! Connection manager
//!
//! Owns the single connection to the selected device and drives the connect
//! handshake:
//!
//! ```text
//! Idle -> PermissionRequested -> PermissionGranted -> Open -> Closing
//!   ^            |                      |                        |
//!   +------------+---- failure ---------+------------------------+
//! ```
//!
//! A connect attempt parks its completion in a single pending slot. The slot
//! is resolved exactly once, by the permission continuation on success or by
//! whichever step fails first, and every failure rolls the state back to
//! `Idle`. A second connect while one is in flight is rejected up front
//! instead of replacing the slot. `Idle` is only published again once a
//! disconnect has stopped the reader and closed the device.
//!
//! Endpoint I/O goes through a [`SharedConnection`]; holding its lock is the
//! exclusion between the reader's polls and writes.

use crate::usb::matcher::find_device;
use crate::usb::platform::{Connection, PermissionGrant, Platform, PlatformError};
use crate::usb::reader::{ReaderHandle, ReaderSettings, spawn_reader};
use crate::usb::validator::{Endpoints, validate};
use crate::usb::writer::write_blocking;
use common::EventPublisher;
use protocol::{ConnectError, DeviceDescriptor, DisconnectError, WriteError, decode_hex};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Open connection shared by the reader and writers
///
/// `None` once the connection has been closed.
pub type SharedConnection = Arc<Mutex<Option<Box<dyn Connection>>>>;

type ConnectResult = Result<(), ConnectError>;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkState {
    #[default]
    Idle,
    PermissionRequested,
    PermissionGranted,
    Open,
    /// Disconnect underway: the reader is stopping and the device closing
    Closing,
}

#[derive(Default)]
struct ConnectionState {
    phase: LinkState,
    device: Option<DeviceDescriptor>,
    endpoints: Option<Endpoints>,
    connection: Option<SharedConnection>,
    reader: Option<ReaderHandle>,
    pending: Option<oneshot::Sender<ConnectResult>>,
}

impl ConnectionState {
    /// Resolve the pending connect, if any
    fn resolve(&mut self, result: ConnectResult) {
        match self.pending.take() {
            Some(tx) => {
                if tx.send(result).is_err() {
                    debug!("Connect caller went away before the result arrived");
                }
            }
            None => warn!("Connect result with no pending caller: {:?}", result),
        }
    }

    /// Roll back to `Idle`, handing out whatever was open
    fn clear(&mut self) -> (Option<ReaderHandle>, Option<SharedConnection>) {
        self.phase = LinkState::Idle;
        self.device = None;
        self.endpoints = None;
        (self.reader.take(), self.connection.take())
    }
}

struct Inner<P: Platform> {
    platform: P,
    state: Mutex<ConnectionState>,
    events: EventPublisher,
    settings: ReaderSettings,
}

impl<P: Platform> Inner<P> {
    fn state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the connect attempt in flight and return to `Idle`
    fn fail(&self, state: &mut ConnectionState, err: ConnectError) {
        error!("[{}] {}", err.code(), err);
        let (reader, connection) = state.clear();
        debug_assert!(reader.is_none() && connection.is_none());
        state.resolve(Err(err));
    }

    /// Select the device from an enumeration and ask for access to it
    ///
    /// The permission continuation only holds a weak reference, so dropping
    /// every manager handle drops the pending slot and the caller sees
    /// [`ConnectError::Aborted`].
    fn begin_connect(
        self: &Arc<Self>,
        devices: Result<Vec<DeviceDescriptor>, PlatformError>,
        vendor_id: u16,
        product_id: u16,
    ) -> Result<oneshot::Receiver<ConnectResult>, ConnectError> {
        let (device, completion) = {
            let mut state = self.state();

            match state.phase {
                LinkState::Idle => {}
                LinkState::Open | LinkState::Closing => {
                    warn!("Connect requested while a connection is open");
                    return Err(ConnectError::AlreadyConnected);
                }
                LinkState::PermissionRequested | LinkState::PermissionGranted => {
                    warn!("Connect requested while another connect is in progress");
                    return Err(ConnectError::ConnectPending);
                }
            }

            let (tx, rx) = oneshot::channel();
            state.pending = Some(tx);

            let devices = match devices {
                Ok(devices) => devices,
                Err(e) => {
                    warn!("{}", e);
                    self.fail(&mut state, ConnectError::NoDevicesAvailable);
                    return Ok(rx);
                }
            };

            let Some(device) = find_device(&devices, vendor_id, product_id) else {
                self.fail(
                    &mut state,
                    ConnectError::NoDeviceFound {
                        vendor_id,
                        product_id,
                    },
                );
                return Ok(rx);
            };

            state.device = Some(device.clone());
            state.phase = LinkState::PermissionRequested;
            (device, rx)
        };

        debug!("Checking USB permission for {}", device);
        let permission = self.platform.request_permission(&device);

        let inner = Arc::downgrade(self);
        tokio::spawn(async move {
            let grant = permission
                .await
                .unwrap_or_else(|_| PermissionGrant::denied(None));

            let Some(inner) = inner.upgrade() else {
                debug!("Permission decision arrived after the manager was dropped");
                return;
            };

            // Opening the device may block
            let result = tokio::task::spawn_blocking(move || inner.on_permission(grant)).await;
            if let Err(e) = result {
                error!("Permission handler failed: {}", e);
            }
        });

        Ok(completion)
    }

    /// Continuation of a connect once the platform has decided on access
    fn on_permission(&self, grant: PermissionGrant) {
        let mut state = self.state();

        if state.phase != LinkState::PermissionRequested {
            warn!("Ignoring permission result with no connect in progress");
            return;
        }

        if !grant.granted {
            match &grant.device {
                Some(device) => debug!("Permission denied for device {}", device),
                None => debug!("Permission denied"),
            }
            return self.fail(&mut state, ConnectError::PermissionDenied);
        }

        let Some(device) = grant.device else {
            return self.fail(&mut state, ConnectError::NullDevice);
        };
        state.phase = LinkState::PermissionGranted;
        debug!("Permission granted for device {}", device);

        let endpoints = match validate(&device) {
            Ok(endpoints) => endpoints,
            Err(e) => return self.fail(&mut state, e.into()),
        };

        let connection = match self.platform.open(&device) {
            Ok(connection) => connection,
            Err(e) => {
                warn!("{}", e);
                return self.fail(&mut state, ConnectError::OpenFailed);
            }
        };
        let connection: SharedConnection = Arc::new(Mutex::new(Some(connection)));

        let reader = match spawn_reader(
            Arc::clone(&connection),
            endpoints.input,
            self.events.clone(),
            self.settings,
        ) {
            Ok(reader) => reader,
            Err(e) => {
                warn!("Failed to spawn USB reader: {}", e);
                close(&connection);
                return self.fail(&mut state, ConnectError::OpenFailed);
            }
        };

        info!("USB device {} opened successfully", device);
        state.device = Some(device);
        state.endpoints = Some(endpoints);
        state.connection = Some(connection);
        state.reader = Some(reader);
        state.phase = LinkState::Open;
        state.resolve(Ok(()));
    }

    /// Tear down the open connection, publishing `Idle` only once it is closed
    fn disconnect(&self) -> Result<(), DisconnectError> {
        let (reader, connection) = {
            let mut state = self.state();
            if state.phase != LinkState::Open {
                let err = DisconnectError::NotConnected;
                error!("[{}] {}", err.code(), err);
                return Err(err);
            }
            state.phase = LinkState::Closing;
            (state.reader.take(), state.connection.take())
        };

        teardown(reader, connection);
        self.state().clear();

        info!("USB connection closed");
        Ok(())
    }
}

impl<P: Platform> Drop for Inner<P> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        let (reader, connection) = state.clear();
        teardown(reader, connection);
    }
}

/// Stop the reader first, so it never polls a closed connection
fn teardown(reader: Option<ReaderHandle>, connection: Option<SharedConnection>) {
    if let Some(reader) = reader {
        reader.stop();
    }
    if let Some(connection) = connection {
        close(&connection);
    }
}

/// Close a shared connection; later calls find it already gone
fn close(connection: &SharedConnection) {
    let mut guard = connection.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(mut connection) = guard.take() {
        connection.close();
    }
}

/// Handle to the connection core
///
/// Cheap to clone; all clones share the same connection.
pub struct ConnectionManager<P: Platform> {
    inner: Arc<Inner<P>>,
}

impl<P: Platform> Clone for ConnectionManager<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Platform> ConnectionManager<P> {
    /// Create an idle manager publishing inbound data to `events`
    pub fn new(platform: P, events: EventPublisher, settings: ReaderSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                platform,
                state: Mutex::new(ConnectionState::default()),
                events,
                settings,
            }),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> LinkState {
        self.inner.state().phase
    }

    /// Device of the open connection
    pub fn device(&self) -> Option<DeviceDescriptor> {
        self.inner.state().device.clone()
    }

    /// Validated endpoints of the open connection
    pub fn endpoints(&self) -> Option<Endpoints> {
        self.inner.state().endpoints
    }

    /// Connect to the device with the given VID/PID
    ///
    /// Resolves once the platform has answered the permission request and
    /// the device is open with its reader running, or with the first
    /// failure. Enumeration runs on the blocking pool. The returned future
    /// does not borrow the manager; if every handle is dropped before the
    /// attempt resolves it completes with [`ConnectError::Aborted`]. Must be
    /// polled within a Tokio runtime.
    pub fn connect(
        &self,
        vendor_id: u16,
        product_id: u16,
    ) -> impl Future<Output = Result<(), ConnectError>> + Send + use<P> {
        let inner = Arc::clone(&self.inner);

        async move {
            let enumerator = Arc::clone(&inner);
            let devices = tokio::task::spawn_blocking(move || enumerator.platform.devices())
                .await
                .unwrap_or_else(|e| Err(PlatformError::Unavailable(e.to_string())));

            let completion = inner.begin_connect(devices, vendor_id, product_id)?;
            drop(inner);

            completion.await.unwrap_or(Err(ConnectError::Aborted))
        }
    }

    /// Close the open connection and stop its reader
    ///
    /// Blocks the calling thread until the reader has exited and the device
    /// is closed, which can include waiting out an in-flight write. From
    /// async code use [`Self::disconnect_async`].
    pub fn disconnect(&self) -> Result<(), DisconnectError> {
        self.inner.disconnect()
    }

    /// [`Self::disconnect`] on the blocking pool
    pub async fn disconnect_async(&self) -> Result<(), DisconnectError> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.disconnect())
            .await
            .map_err(|e| {
                error!("Disconnect task failed: {}", e);
                DisconnectError::Aborted
            })?
    }

    /// Write a hex-encoded payload to the OUT endpoint
    ///
    /// Blocks (on a blocking-pool thread) until the queued request completes.
    pub async fn write(&self, data: &str) -> Result<(), WriteError> {
        let (connection, endpoint) = {
            let state = self.inner.state();
            match (state.phase, &state.connection, &state.endpoints) {
                (LinkState::Open, Some(connection), Some(endpoints)) => {
                    (Arc::clone(connection), endpoints.output)
                }
                _ => {
                    let err = WriteError::NotConnected;
                    error!("[{}] {}", err.code(), err);
                    return Err(err);
                }
            }
        };

        let payload = decode_hex(data).map_err(|e| {
            warn!("Rejecting malformed write payload: {}", e);
            WriteError::from(e)
        })?;

        tokio::task::spawn_blocking(move || write_blocking(&connection, &endpoint, &payload))
            .await
            .map_err(|e| WriteError::Failed(e.to_string()))?
    }
}
