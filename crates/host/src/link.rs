//! Byte-oriented facade over the connection core
//!
//! Callers that work in bytes rather than hex strings use [`UsbLink`]: it
//! owns the event channel, hex-encodes outbound payloads and decodes
//! inbound `usbData` events back into frames.

use crate::config::LinkConfig;
use crate::usb::{ConnectionManager, LinkState, Platform};
use common::{EventSubscriber, create_event_channel};
use protocol::{ConnectError, DisconnectError, UsbEvent, WriteError, decode_hex, encode_hex};
use tracing::warn;

pub struct UsbLink<P: Platform> {
    manager: ConnectionManager<P>,
    events: EventSubscriber,
}

impl<P: Platform> UsbLink<P> {
    pub fn new(platform: P, config: &LinkConfig) -> Self {
        let (publisher, events) = create_event_channel(config.events.capacity);
        let manager = ConnectionManager::new(platform, publisher, config.reader_settings());

        Self { manager, events }
    }

    pub async fn connect(&self, vendor_id: u16, product_id: u16) -> Result<(), ConnectError> {
        self.manager.connect(vendor_id, product_id).await
    }

    pub fn disconnect(&self) -> Result<(), DisconnectError> {
        self.manager.disconnect()
    }

    /// Write raw bytes to the OUT endpoint
    pub async fn write(&self, data: &[u8]) -> Result<(), WriteError> {
        self.manager.write(&encode_hex(data)).await
    }

    /// Next inbound frame, decoded from its `usbData` event
    pub async fn next_frame(&self) -> common::Result<Vec<u8>> {
        loop {
            match self.events.recv().await? {
                UsbEvent::Data { payload } => match decode_hex(&payload) {
                    Ok(frame) => return Ok(frame),
                    Err(e) => warn!("Dropping undecodable usbData payload: {}", e),
                },
            }
        }
    }

    /// Raw `usbData` events, for callers that want the hex payloads
    pub fn events(&self) -> EventSubscriber {
        self.events.clone()
    }

    pub fn state(&self) -> LinkState {
        self.manager.state()
    }

    pub fn manager(&self) -> &ConnectionManager<P> {
        &self.manager
    }
}
