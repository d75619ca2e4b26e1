//! In-memory platform
//!
//! Scripted stand-in for a real USB stack, used by the unit and integration
//! tests. Devices, the permission outcome, open failures, inbound reports and
//! write completions are all controlled by the test. Every endpoint call
//! passes through an overlap detector that counts any two calls executing at
//! the same time.

use crate::usb::platform::{
    Connection, PermissionGrant, PermissionRequest, Platform, PlatformError, TransferError,
};
use protocol::{DeviceDescriptor, EndpointDescriptor, RequestId};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

/// How the mock answers permission requests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PermissionScript {
    /// Grant access and echo the device back
    #[default]
    Grant,
    /// Deny access
    Deny,
    /// Grant access but report no device
    GrantWithoutDevice,
    /// Hold the request until [`MockPlatform::answer_permission`] is called
    Hold,
}

#[derive(Default)]
struct MockState {
    devices: Option<Vec<DeviceDescriptor>>,
    permission: PermissionScript,
    held: Vec<oneshot::Sender<PermissionGrant>>,
    fail_open: bool,
    reject_submissions: bool,
    fail_completions: bool,
    stray_completion: bool,
    reads: VecDeque<Vec<u8>>,
    written: Vec<Vec<u8>>,
    opened: usize,
    closed: usize,
    max_live: usize,
}

/// Scripted platform shared between a test and the code under test
#[derive(Clone, Default)]
pub struct MockPlatform {
    state: Arc<Mutex<MockState>>,
    in_io: Arc<AtomicBool>,
    overlaps: Arc<AtomicUsize>,
    reads: Arc<AtomicUsize>,
    io_delay: Arc<Mutex<Duration>>,
}

impl MockPlatform {
    /// Platform exposing the given devices, granting every permission request
    pub fn new(devices: Vec<DeviceDescriptor>) -> Self {
        let platform = Self::default();
        platform.state().devices = Some(devices);
        platform
    }

    /// Platform whose enumeration service is unavailable
    pub fn unavailable() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_permission(&self, script: PermissionScript) {
        self.state().permission = script;
    }

    /// Answer every held permission request
    pub fn answer_permission(&self, grant: PermissionGrant) {
        let held = std::mem::take(&mut self.state().held);
        for tx in held {
            let _ = tx.send(grant.clone());
        }
    }

    /// Drop every held permission request without answering it
    pub fn abandon_permissions(&self) {
        self.state().held.clear();
    }

    /// Number of permission requests still waiting for an answer
    pub fn held_permissions(&self) -> usize {
        self.state().held.len()
    }

    pub fn fail_open(&self, fail: bool) {
        self.state().fail_open = fail;
    }

    pub fn reject_submissions(&self, reject: bool) {
        self.state().reject_submissions = reject;
    }

    pub fn fail_completions(&self, fail: bool) {
        self.state().fail_completions = fail;
    }

    /// Report an unrelated completion ahead of each real one
    pub fn inject_stray_completion(&self, inject: bool) {
        self.state().stray_completion = inject;
    }

    /// Time each endpoint call spends inside the overlap detector
    pub fn set_io_delay(&self, delay: Duration) {
        *self.io_delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Queue an inbound report for the next read
    pub fn push_read(&self, bytes: Vec<u8>) {
        self.state().reads.push_back(bytes);
    }

    /// Payloads accepted by `submit`, in order
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state().written.clone()
    }

    pub fn open_count(&self) -> usize {
        self.state().opened
    }

    pub fn close_count(&self) -> usize {
        self.state().closed
    }

    /// Most connections ever open at the same time
    pub fn max_open(&self) -> usize {
        self.state().max_live
    }

    /// Number of read calls performed so far
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of endpoint calls that started while another was running
    pub fn overlap_count(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }
}

impl Platform for MockPlatform {
    fn devices(&self) -> Result<Vec<DeviceDescriptor>, PlatformError> {
        self.state()
            .devices
            .clone()
            .ok_or_else(|| PlatformError::Unavailable("mock USB service absent".to_string()))
    }

    fn request_permission(&self, device: &DeviceDescriptor) -> PermissionRequest {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state();

        let grant = match state.permission {
            PermissionScript::Grant => PermissionGrant::granted(device.clone()),
            PermissionScript::Deny => PermissionGrant::denied(Some(device.clone())),
            PermissionScript::GrantWithoutDevice => PermissionGrant {
                granted: true,
                device: None,
            },
            PermissionScript::Hold => {
                state.held.push(tx);
                return rx;
            }
        };

        let _ = tx.send(grant);
        rx
    }

    fn open(&self, device: &DeviceDescriptor) -> Result<Box<dyn Connection>, PlatformError> {
        let mut state = self.state();
        if state.fail_open {
            return Err(PlatformError::Open(format!("mock refused to open {}", device)));
        }
        state.opened += 1;
        state.max_live = state.max_live.max(state.opened - state.closed);

        Ok(Box::new(MockConnection {
            platform: self.clone(),
            completions: VecDeque::new(),
            next_id: 1,
            closed: false,
        }))
    }
}

struct MockConnection {
    platform: MockPlatform,
    completions: VecDeque<Result<RequestId, TransferError>>,
    next_id: u64,
    closed: bool,
}

impl MockConnection {
    /// Run `f` inside the overlap detector
    fn exclusive<T>(&self, f: impl FnOnce() -> T) -> T {
        if self.platform.in_io.swap(true, Ordering::SeqCst) {
            self.platform.overlaps.fetch_add(1, Ordering::SeqCst);
        }

        let delay = *self
            .platform
            .io_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let result = f();
        self.platform.in_io.store(false, Ordering::SeqCst);
        result
    }
}

impl Connection for MockConnection {
    fn read(
        &mut self,
        _endpoint: &EndpointDescriptor,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, TransferError> {
        if self.closed {
            return Err(TransferError::NoDevice);
        }

        let platform = self.platform.clone();
        self.exclusive(|| {
            platform.reads.fetch_add(1, Ordering::SeqCst);
            let report = platform.state().reads.pop_front();
            match report {
                Some(bytes) => {
                    let len = bytes.len().min(buf.len());
                    buf[..len].copy_from_slice(&bytes[..len]);
                    Ok(len)
                }
                None => Err(TransferError::Timeout),
            }
        })
    }

    fn submit(
        &mut self,
        _endpoint: &EndpointDescriptor,
        buf: &[u8],
    ) -> Result<RequestId, TransferError> {
        if self.closed {
            return Err(TransferError::NoDevice);
        }

        let id = RequestId(self.next_id);
        self.next_id += 1;

        let platform = self.platform.clone();
        let (stray, fail) = self.exclusive(|| {
            let mut state = platform.state();
            if state.reject_submissions {
                return Err(TransferError::Rejected("mock queue full".to_string()));
            }
            state.written.push(buf.to_vec());
            Ok((state.stray_completion, state.fail_completions))
        })?;

        if stray {
            self.completions.push_back(Ok(RequestId(u64::MAX - id.0)));
        }
        self.completions
            .push_back(if fail { Err(TransferError::Pipe) } else { Ok(id) });
        Ok(id)
    }

    fn wait(&mut self) -> Result<RequestId, TransferError> {
        let completion = self.completions.pop_front();
        self.exclusive(|| {
            completion.unwrap_or_else(|| Err(TransferError::Other("no request queued".to_string())))
        })
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.platform.state().closed += 1;
        }
    }
}
