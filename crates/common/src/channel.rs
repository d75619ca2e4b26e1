//! Event channel between the USB reader thread and the host application
//!
//! The reader runs on a dedicated OS thread and must never block on a slow
//! subscriber, so publishing is non-blocking and a full channel drops the
//! event. Subscribers may receive from async or blocking contexts.

use async_channel::{Receiver, Sender, TrySendError, bounded};
use protocol::UsbEvent;

/// Publishing half, owned by the connection core
#[derive(Clone)]
pub struct EventPublisher {
    event_tx: Sender<UsbEvent>,
}

impl EventPublisher {
    /// Publish an event without blocking
    pub fn publish(&self, event: UsbEvent) -> crate::Result<()> {
        self.event_tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(event) => crate::Error::ChannelFull {
                event: event.name(),
            },
            TrySendError::Closed(_) => crate::Error::ChannelClosed,
        })
    }
}

/// Subscribing half, handed to the host application
#[derive(Clone)]
pub struct EventSubscriber {
    event_rx: Receiver<UsbEvent>,
}

impl EventSubscriber {
    /// Receive the next event
    pub async fn recv(&self) -> crate::Result<UsbEvent> {
        self.event_rx
            .recv()
            .await
            .map_err(|_| crate::Error::ChannelClosed)
    }

    /// Receive the next event (blocking)
    pub fn recv_blocking(&self) -> crate::Result<UsbEvent> {
        self.event_rx
            .recv_blocking()
            .map_err(|_| crate::Error::ChannelClosed)
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&self) -> Option<UsbEvent> {
        self.event_rx.try_recv().ok()
    }
}

/// Create the event channel
///
/// Returns (EventPublisher for the USB side, EventSubscriber for the application)
pub fn create_event_channel(capacity: usize) -> (EventPublisher, EventSubscriber) {
    let (event_tx, event_rx) = bounded(capacity.max(1));

    (EventPublisher { event_tx }, EventSubscriber { event_rx })
}
