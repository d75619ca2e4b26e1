//! Integration tests for the connection core
//!
//! Drives `ConnectionManager` and `UsbLink` end to end against the scripted
//! `MockPlatform`:
//! - Connect handshake outcomes and rollback to `Idle`
//! - Inbound reports published as `usbData` events
//! - Writes, their failure modes, and exclusion against the reader
//! - Disconnect

use common::test_utils::{
    DEFAULT_TEST_TIMEOUT, MOCK_PACKET_SIZE, create_device_with_endpoints, create_interrupt_device,
    with_timeout,
};
use common::{EventSubscriber, create_event_channel};
use host::config::LinkConfig;
use host::usb::{
    ConnectionManager, LinkState, MockPlatform, PermissionGrant, PermissionScript, ReaderSettings,
};
use host::UsbLink;
use protocol::{
    ConnectError, DisconnectError, EndpointDescriptor, TransferKind, UsbEvent, ValidationError,
    WriteError,
};
use std::time::Duration;

const VID: u16 = 0x04d8;
const PID: u16 = 0x00df;

fn fast_settings() -> ReaderSettings {
    ReaderSettings {
        read_timeout: Duration::from_millis(5),
        read_interval: Duration::from_millis(1),
    }
}

fn manager(platform: &MockPlatform) -> (ConnectionManager<MockPlatform>, EventSubscriber) {
    let (publisher, subscriber) = create_event_channel(64);
    let manager = ConnectionManager::new(platform.clone(), publisher, fast_settings());
    (manager, subscriber)
}

async fn connect(manager: &ConnectionManager<MockPlatform>) -> Result<(), ConnectError> {
    with_timeout(DEFAULT_TEST_TIMEOUT, manager.connect(VID, PID))
        .await
        .expect("connect timed out")
}

async fn next_event(events: &EventSubscriber) -> UsbEvent {
    with_timeout(DEFAULT_TEST_TIMEOUT, events.recv())
        .await
        .expect("no event before timeout")
        .expect("event channel closed")
}

mod connect {
    use super::*;

    #[tokio::test]
    async fn test_well_formed_device_opens() {
        let platform = MockPlatform::new(vec![create_interrupt_device(VID, PID)]);
        let (manager, _events) = manager(&platform);

        assert_eq!(connect(&manager).await, Ok(()));
        assert_eq!(manager.state(), LinkState::Open);
        assert_eq!(platform.open_count(), 1);

        let endpoints = manager.endpoints().unwrap();
        assert_eq!(endpoints.input.address, 0x81);
        assert_eq!(endpoints.output.address, 0x01);

        manager.disconnect().unwrap();
    }

    #[tokio::test]
    async fn test_bulk_out_endpoint_rejected() {
        let device = create_device_with_endpoints(
            VID,
            PID,
            vec![
                EndpointDescriptor::interrupt_in(1, MOCK_PACKET_SIZE),
                EndpointDescriptor::interrupt_out(2, MOCK_PACKET_SIZE)
                    .with_kind(TransferKind::Bulk),
            ],
        );
        let platform = MockPlatform::new(vec![device]);
        let (manager, _events) = manager(&platform);

        let err = connect(&manager).await.unwrap_err();
        assert_eq!(
            err,
            ConnectError::Invalid(ValidationError::SecondEndpointWrongType)
        );
        assert_eq!(err.code(), "E107");
        assert_eq!(manager.state(), LinkState::Idle);
        assert_eq!(platform.open_count(), 0);
    }

    #[tokio::test]
    async fn test_permission_denied_leaves_state_empty() {
        let platform = MockPlatform::new(vec![create_interrupt_device(VID, PID)]);
        platform.set_permission(PermissionScript::Deny);
        let (manager, _events) = manager(&platform);

        assert_eq!(connect(&manager).await, Err(ConnectError::PermissionDenied));
        assert_eq!(manager.state(), LinkState::Idle);
        assert!(manager.device().is_none());
        assert!(manager.endpoints().is_none());
        assert_eq!(platform.open_count(), 0);
    }

    #[tokio::test]
    async fn test_granted_without_device() {
        let platform = MockPlatform::new(vec![create_interrupt_device(VID, PID)]);
        platform.set_permission(PermissionScript::GrantWithoutDevice);
        let (manager, _events) = manager(&platform);

        let err = connect(&manager).await.unwrap_err();
        assert_eq!(err, ConnectError::NullDevice);
        assert_eq!(err.code(), "E101");
        assert_eq!(manager.state(), LinkState::Idle);
    }

    #[tokio::test]
    async fn test_no_matching_device() {
        let platform = MockPlatform::new(vec![create_interrupt_device(0x1234, 0x5678)]);
        let (manager, _events) = manager(&platform);

        let err = connect(&manager).await.unwrap_err();
        assert_eq!(
            err,
            ConnectError::NoDeviceFound {
                vendor_id: VID,
                product_id: PID,
            }
        );
        assert_eq!(err.code(), "E100");
        assert_eq!(manager.state(), LinkState::Idle);
    }

    #[tokio::test]
    async fn test_usb_service_unavailable() {
        let platform = MockPlatform::unavailable();
        let (manager, _events) = manager(&platform);

        let err = connect(&manager).await.unwrap_err();
        assert_eq!(err, ConnectError::NoDevicesAvailable);
        assert_eq!(err.code(), "E110");
        assert_eq!(manager.state(), LinkState::Idle);
    }

    #[tokio::test]
    async fn test_open_failure() {
        let platform = MockPlatform::new(vec![create_interrupt_device(VID, PID)]);
        platform.fail_open(true);
        let (manager, _events) = manager(&platform);

        let err = connect(&manager).await.unwrap_err();
        assert_eq!(err, ConnectError::OpenFailed);
        assert_eq!(err.code(), "E109");
        assert_eq!(manager.state(), LinkState::Idle);
        assert!(manager.device().is_none());
    }

    #[tokio::test]
    async fn test_reconnect_after_failure() {
        let platform = MockPlatform::new(vec![create_interrupt_device(VID, PID)]);
        platform.set_permission(PermissionScript::Deny);
        let (manager, _events) = manager(&platform);

        assert_eq!(connect(&manager).await, Err(ConnectError::PermissionDenied));

        platform.set_permission(PermissionScript::Grant);
        assert_eq!(connect(&manager).await, Ok(()));
        assert_eq!(manager.state(), LinkState::Open);

        manager.disconnect().unwrap();
    }

    #[tokio::test]
    async fn test_held_permission_then_denied() {
        let platform = MockPlatform::new(vec![create_interrupt_device(VID, PID)]);
        platform.set_permission(PermissionScript::Hold);
        let (manager, _events) = manager(&platform);

        let pending = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.connect(VID, PID).await })
        };

        with_timeout(DEFAULT_TEST_TIMEOUT, async {
            while platform.held_permissions() == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(manager.state(), LinkState::PermissionRequested);

        platform.answer_permission(PermissionGrant::denied(None));
        let result = with_timeout(DEFAULT_TEST_TIMEOUT, pending)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(ConnectError::PermissionDenied));
        assert_eq!(manager.state(), LinkState::Idle);
    }
}

mod reader {
    use super::*;

    #[tokio::test]
    async fn test_inbound_report_emits_usb_data() {
        let platform = MockPlatform::new(vec![create_interrupt_device(VID, PID)]);
        let (manager, events) = manager(&platform);
        connect(&manager).await.unwrap();

        platform.push_read(vec![0xDE, 0xAD]);

        let event = next_event(&events).await;
        assert_eq!(event.name(), "usbData");
        assert_eq!(
            event,
            UsbEvent::Data {
                payload: "DEAD".to_string()
            }
        );

        manager.disconnect().unwrap();
    }

    #[tokio::test]
    async fn test_reports_arrive_in_order() {
        let platform = MockPlatform::new(vec![create_interrupt_device(VID, PID)]);
        let (manager, events) = manager(&platform);
        connect(&manager).await.unwrap();

        platform.push_read(vec![0x01]);
        platform.push_read(vec![0x02, 0x03]);
        platform.push_read(vec![0xff]);

        let mut payloads = Vec::new();
        for _ in 0..3 {
            let UsbEvent::Data { payload } = next_event(&events).await;
            payloads.push(payload);
        }
        assert_eq!(payloads, vec!["01", "0203", "FF"]);

        manager.disconnect().unwrap();
    }

    #[tokio::test]
    async fn test_zero_length_report_emits_empty_payload() {
        let platform = MockPlatform::new(vec![create_interrupt_device(VID, PID)]);
        let (manager, events) = manager(&platform);
        connect(&manager).await.unwrap();

        platform.push_read(vec![]);

        assert_eq!(
            next_event(&events).await,
            UsbEvent::Data {
                payload: String::new()
            }
        );

        manager.disconnect().unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_stops_polling() {
        let platform = MockPlatform::new(vec![create_interrupt_device(VID, PID)]);
        let (manager, _events) = manager(&platform);
        connect(&manager).await.unwrap();

        manager.disconnect().unwrap();
        let reads = platform.read_count();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(platform.read_count(), reads);
        assert_eq!(platform.close_count(), 1);
    }
}

mod write {
    use super::*;

    #[tokio::test]
    async fn test_write_without_connection() {
        let platform = MockPlatform::new(vec![create_interrupt_device(VID, PID)]);
        let (manager, _events) = manager(&platform);

        let err = manager.write("0102").await.unwrap_err();
        assert_eq!(err, WriteError::NotConnected);
        assert_eq!(err.code(), "E200");
        assert!(platform.written().is_empty());
        assert_eq!(platform.open_count(), 0);
    }

    #[tokio::test]
    async fn test_write_after_disconnect() {
        let platform = MockPlatform::new(vec![create_interrupt_device(VID, PID)]);
        let (manager, _events) = manager(&platform);
        connect(&manager).await.unwrap();
        manager.disconnect().unwrap();

        assert_eq!(manager.write("01").await, Err(WriteError::NotConnected));
        assert!(platform.written().is_empty());
    }

    #[tokio::test]
    async fn test_write_submits_padded_packet() {
        let platform = MockPlatform::new(vec![create_interrupt_device(VID, PID)]);
        let (manager, _events) = manager(&platform);
        connect(&manager).await.unwrap();

        manager.write("A1b2").await.unwrap();

        let written = platform.written();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].len(), usize::from(MOCK_PACKET_SIZE));
        assert_eq!(&written[0][..2], &[0xA1, 0xB2]);
        assert!(written[0][2..].iter().all(|&b| b == 0));

        manager.disconnect().unwrap();
    }

    #[tokio::test]
    async fn test_malformed_hex_is_not_submitted() {
        let platform = MockPlatform::new(vec![create_interrupt_device(VID, PID)]);
        let (manager, _events) = manager(&platform);
        connect(&manager).await.unwrap();

        let err = manager.write("ABC").await.unwrap_err();
        assert!(matches!(err, WriteError::InvalidHex(_)));
        assert_eq!(err.code(), "E203");

        let err = manager.write("zz").await.unwrap_err();
        assert!(matches!(err, WriteError::InvalidHex(_)));
        assert!(platform.written().is_empty());

        manager.disconnect().unwrap();
    }

    #[tokio::test]
    async fn test_oversized_payload() {
        let platform = MockPlatform::new(vec![create_interrupt_device(VID, PID)]);
        let (manager, _events) = manager(&platform);
        connect(&manager).await.unwrap();

        let payload = "00".repeat(usize::from(MOCK_PACKET_SIZE) + 1);
        let err = manager.write(&payload).await.unwrap_err();
        assert!(matches!(err, WriteError::Failed(_)));
        assert_eq!(err.code(), "E202");
        assert!(platform.written().is_empty());

        manager.disconnect().unwrap();
    }

    #[tokio::test]
    async fn test_queue_failure() {
        let platform = MockPlatform::new(vec![create_interrupt_device(VID, PID)]);
        let (manager, _events) = manager(&platform);
        connect(&manager).await.unwrap();

        platform.reject_submissions(true);
        let err = manager.write("01").await.unwrap_err();
        assert_eq!(err, WriteError::QueueFailed);
        assert_eq!(err.code(), "E201");

        // The connection stays usable
        platform.reject_submissions(false);
        manager.write("01").await.unwrap();
        assert_eq!(manager.state(), LinkState::Open);

        manager.disconnect().unwrap();
    }

    #[tokio::test]
    async fn test_failed_completion() {
        let platform = MockPlatform::new(vec![create_interrupt_device(VID, PID)]);
        let (manager, _events) = manager(&platform);
        connect(&manager).await.unwrap();

        platform.fail_completions(true);
        let err = manager.write("01").await.unwrap_err();
        assert!(matches!(err, WriteError::Failed(_)));

        manager.disconnect().unwrap();
    }

    #[tokio::test]
    async fn test_unrelated_completion_is_skipped() {
        let platform = MockPlatform::new(vec![create_interrupt_device(VID, PID)]);
        let (manager, _events) = manager(&platform);
        connect(&manager).await.unwrap();

        platform.inject_stray_completion(true);
        manager.write("0102").await.unwrap();
        assert_eq!(platform.written().len(), 1);

        manager.disconnect().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_reader_and_writers_never_overlap() {
        let platform = MockPlatform::new(vec![create_interrupt_device(VID, PID)]);
        platform.set_io_delay(Duration::from_millis(1));
        let (manager, events) = manager(&platform);
        connect(&manager).await.unwrap();

        for i in 0..10u8 {
            platform.push_read(vec![i]);
        }

        let mut writers = Vec::new();
        for i in 0..8u8 {
            let manager = manager.clone();
            writers.push(tokio::spawn(async move {
                for _ in 0..5 {
                    manager.write(&format!("{:02X}", i)).await.unwrap();
                }
            }));
        }
        for writer in writers {
            with_timeout(DEFAULT_TEST_TIMEOUT, writer)
                .await
                .unwrap()
                .unwrap();
        }

        for _ in 0..10 {
            next_event(&events).await;
        }

        manager.disconnect().unwrap();
        assert_eq!(platform.written().len(), 40);
        assert_eq!(platform.overlap_count(), 0);
    }
}

mod disconnect {
    use super::*;

    #[tokio::test]
    async fn test_disconnect_while_idle() {
        let platform = MockPlatform::new(vec![create_interrupt_device(VID, PID)]);
        let (manager, _events) = manager(&platform);

        let err = manager.disconnect().unwrap_err();
        assert_eq!(err, DisconnectError::NotConnected);
        assert_eq!(err.code(), "E400");
        assert_eq!(manager.state(), LinkState::Idle);
        assert_eq!(platform.open_count(), 0);
        assert_eq!(platform.close_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reconnect_waits_for_teardown() {
        let platform = MockPlatform::new(vec![create_interrupt_device(VID, PID)]);
        let (manager, _events) = manager(&platform);
        connect(&manager).await.unwrap();

        // Keep the reader inside a slow read so teardown takes a while
        platform.set_io_delay(Duration::from_millis(300));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let closing = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.disconnect_async().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        match connect(&manager).await {
            Ok(()) => assert_eq!(platform.close_count(), 1),
            Err(err) => {
                assert_eq!(err, ConnectError::AlreadyConnected);
                assert_eq!(platform.open_count(), 1);
            }
        }

        with_timeout(DEFAULT_TEST_TIMEOUT, closing)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        if manager.state() == LinkState::Idle {
            connect(&manager).await.unwrap();
        }
        assert_eq!(manager.state(), LinkState::Open);
        assert_eq!(platform.open_count(), 2);
        assert_eq!(platform.close_count(), 1);
        assert_eq!(platform.max_open(), 1);

        platform.set_io_delay(Duration::ZERO);
        manager.disconnect_async().await.unwrap();
        assert_eq!(platform.close_count(), 2);
    }

    #[tokio::test]
    async fn test_second_disconnect_fails() {
        let platform = MockPlatform::new(vec![create_interrupt_device(VID, PID)]);
        let (manager, _events) = manager(&platform);
        connect(&manager).await.unwrap();

        manager.disconnect().unwrap();
        assert_eq!(manager.disconnect(), Err(DisconnectError::NotConnected));
        assert_eq!(platform.close_count(), 1);
    }
}

mod link {
    use super::*;

    #[tokio::test]
    async fn test_frames_round_trip_through_link() {
        let platform = MockPlatform::new(vec![create_interrupt_device(VID, PID)]);
        let link = UsbLink::new(platform.clone(), &LinkConfig::default());

        with_timeout(DEFAULT_TEST_TIMEOUT, link.connect(VID, PID))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(link.state(), LinkState::Open);

        link.write(&[0xCA, 0xFE]).await.unwrap();
        assert_eq!(&platform.written()[0][..2], &[0xCA, 0xFE]);

        platform.push_read(vec![0xBE, 0xEF]);
        let frame = with_timeout(DEFAULT_TEST_TIMEOUT, link.next_frame())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame, vec![0xBE, 0xEF]);

        link.disconnect().unwrap();
        assert_eq!(link.state(), LinkState::Idle);
    }

    #[tokio::test]
    async fn test_link_write_while_idle() {
        let platform = MockPlatform::new(vec![]);
        let link = UsbLink::new(platform, &LinkConfig::default());

        assert_eq!(link.write(&[0x01]).await, Err(WriteError::NotConnected));
        assert_eq!(link.disconnect(), Err(DisconnectError::NotConnected));
    }
}
