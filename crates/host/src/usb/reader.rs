//! Background reader
//!
//! Dedicated thread that polls the IN endpoint for the lifetime of an open
//! connection and publishes each received report as a `usbData` event.
//!
//! Every poll holds the connection lock for exactly one bounded read, so a
//! write can never overlap a read. The pause between polls happens with the
//! lock released. Read failures are not fatal: the cycle simply produces no
//! event. Only [`ReaderHandle::stop`] or a closed connection ends the loop.

use crate::usb::manager::SharedConnection;
use common::EventPublisher;
use protocol::{EndpointDescriptor, UsbEvent, encode_hex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Default bound on a single IN poll
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Default pause between polls
pub const DEFAULT_READ_INTERVAL: Duration = Duration::from_millis(50);

/// Reader timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderSettings {
    /// Bound on a single IN poll
    pub read_timeout: Duration,
    /// Pause between polls, taken outside the connection lock
    pub read_interval: Duration,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            read_interval: DEFAULT_READ_INTERVAL,
        }
    }
}

/// Handle to a running reader thread
pub struct ReaderHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ReaderHandle {
    /// Signal the reader and wait for it to exit
    ///
    /// The reader only observes the signal between polls, so the connection
    /// lock is never held when it exits.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);

        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            if thread.join().is_err() {
                error!("USB reader thread panicked");
            }
        }
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Outcome of one poll
enum Poll {
    Data(Vec<u8>),
    Empty,
    Closed,
}

struct Reader {
    connection: SharedConnection,
    endpoint: EndpointDescriptor,
    events: EventPublisher,
    settings: ReaderSettings,
    stop: Arc<AtomicBool>,
}

impl Reader {
    fn run(self) {
        info!("USB reader started on endpoint {:#04x}", self.endpoint.address);

        // Sized once per connection from the endpoint this reader was given
        let mut buffer = vec![0u8; usize::from(self.endpoint.max_packet_size)];

        while !self.stop.load(Ordering::Acquire) {
            match self.poll(&mut buffer) {
                Poll::Data(bytes) => self.publish(&bytes),
                Poll::Empty => {}
                Poll::Closed => {
                    debug!("Connection closed under the reader");
                    break;
                }
            }

            if self.stop.load(Ordering::Acquire) {
                break;
            }
            std::thread::park_timeout(self.settings.read_interval);
        }

        info!("USB reader stopped");
    }

    /// One bounded read with the connection lock held
    fn poll(&self, buffer: &mut [u8]) -> Poll {
        let mut guard = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let Some(connection) = guard.as_mut() else {
            return Poll::Closed;
        };

        match connection.read(&self.endpoint, buffer, self.settings.read_timeout) {
            Ok(len) => Poll::Data(buffer[..len.min(buffer.len())].to_vec()),
            Err(e) => {
                trace!("No data this cycle: {}", e);
                Poll::Empty
            }
        }
    }

    fn publish(&self, bytes: &[u8]) {
        let payload = encode_hex(bytes);
        debug!("USB data read: {}", payload);

        if let Err(e) = self.events.publish(UsbEvent::Data { payload }) {
            warn!("Failed to publish USB data: {}", e);
        }
    }
}

/// Spawn the reader thread for an open connection
pub fn spawn_reader(
    connection: SharedConnection,
    endpoint: EndpointDescriptor,
    events: EventPublisher,
    settings: ReaderSettings,
) -> std::io::Result<ReaderHandle> {
    let stop = Arc::new(AtomicBool::new(false));
    let reader = Reader {
        connection,
        endpoint,
        events,
        settings,
        stop: Arc::clone(&stop),
    };

    let thread = std::thread::Builder::new()
        .name("usb-reader".to_string())
        .spawn(move || reader.run())?;

    Ok(ReaderHandle {
        stop,
        thread: Some(thread),
    })
}
