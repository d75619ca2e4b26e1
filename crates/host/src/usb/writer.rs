//! Outbound transfers
//!
//! A write takes the same connection lock as the reader's poll, queues one
//! OUT request sized to the endpoint's max packet size and blocks until that
//! request completes.

use crate::usb::manager::SharedConnection;
use protocol::{EndpointDescriptor, WriteError};
use std::sync::PoisonError;
use tracing::{debug, error};

/// Perform one write, blocking until the submitted request completes
pub(crate) fn write_blocking(
    connection: &SharedConnection,
    endpoint: &EndpointDescriptor,
    payload: &[u8],
) -> Result<(), WriteError> {
    let packet_size = usize::from(endpoint.max_packet_size);
    if payload.len() > packet_size {
        return Err(WriteError::Failed(format!(
            "payload of {} bytes exceeds max packet size {}",
            payload.len(),
            packet_size
        )));
    }

    let mut buffer = vec![0u8; packet_size];
    buffer[..payload.len()].copy_from_slice(payload);

    let mut guard = connection.lock().unwrap_or_else(PoisonError::into_inner);
    let connection = guard.as_mut().ok_or(WriteError::NotConnected)?;

    let request = connection.submit(endpoint, &buffer).map_err(|e| {
        error!("Write request queue failed: {}", e);
        WriteError::QueueFailed
    })?;

    debug!("Write request {:?} sent, waiting for confirmation", request);
    loop {
        match connection.wait() {
            Ok(completed) if completed == request => {
                debug!("Write confirmation received for {:?}", request);
                return Ok(());
            }
            Ok(completed) => {
                debug!("Ignoring completion of unrelated request {:?}", completed);
            }
            Err(e) => {
                error!("Write request {:?} failed: {}", request, e);
                return Err(WriteError::Failed(e.to_string()));
            }
        }
    }
}
