mod common;

use common::{Harness, config, device_info, ext_info, u16_property};
use ptpip_core::protocol::*;
use ptpip_core::transport::{MockReply, MockTransport};
use ptpip_core::events::NullObserver;
use ptpip_core::state::Handshake;
use ptpip_core::{
    ClientError, ClientOptions, HandshakeError, HandshakeState, PrefetchOutcome, PtpIpClient,
    SessionEvent,
};

const STANDARD_OPS: &[OperationCode] = &[
    OP_GET_DEVICE_INFO,
    OP_OPEN_SESSION,
    OP_CLOSE_SESSION,
    OP_GET_DEVICE_PROP_DESC,
    OP_SDIO_CONNECT,
];
const VENDOR_OPS: &[OperationCode] = &[
    OP_SDIO_GET_EXT_DEVICE_INFO,
    OP_SDIO_GET_EXT_DEVICE_PROP_INFO,
    OP_SDIO_SET_EXT_DEVICE_PROP_VALUE,
    OP_SDIO_CONTROL_DEVICE,
];

fn sdio_camera() -> MockTransport {
    let mock = MockTransport::new();
    mock.queue_reply(
        OP_GET_DEVICE_INFO,
        MockReply::ok_with_data(device_info(STANDARD_OPS, &[0x5007]).to_bytes()),
    );
    mock.queue_reply(
        OP_SDIO_GET_EXT_DEVICE_INFO,
        MockReply::ok_with_data(ext_info(VENDOR_OPS, &[0xD21E, 0x5004]).to_bytes()),
    );
    mock
}

/// (op, transaction id, args) of every request the camera saw.
fn wire_log(mock: &MockTransport) -> Vec<(OperationCode, TransactionId, Vec<u32>)> {
    mock.requests()
        .into_iter()
        .map(|r| (r.request.code, r.request.transaction_id, r.request.args))
        .collect()
}

#[tokio::test]
async fn sdio_handshake_reaches_ready() {
    let mock = sdio_camera();
    let mut harness = Harness::new();
    let camera = harness.connect(&mock, &config(false)).await.unwrap();

    assert_eq!(
        wire_log(&mock),
        vec![
            (OP_OPEN_SESSION, 0, vec![1]),
            (OP_GET_DEVICE_INFO, 1, vec![]),
            (OP_SDIO_CONNECT, 2, vec![1, 0, 0]),
            (OP_SDIO_CONNECT, 3, vec![2, 0, 0]),
            (OP_SDIO_GET_EXT_DEVICE_INFO, 4, vec![0x12C]),
            (OP_SDIO_CONNECT, 1, vec![3, 0, 0]),
        ]
    );
    // One reset to 1, then the third connect drew 1.
    assert_eq!(camera.current_transaction_id(), 2);

    let ops = &camera.device_info().supported_operations;
    for op in STANDARD_OPS.iter().chain(VENDOR_OPS) {
        assert!(ops.contains(op), "missing 0x{:04X}", op);
    }
    assert_eq!(ops.len(), STANDARD_OPS.len() + VENDOR_OPS.len());
    assert!(camera.device_info().supported_properties.contains(&0xD21E));
    assert!(camera.ext_info().is_some());
    assert!(matches!(camera.prefetch(), PrefetchOutcome::Disabled));

    let events = harness.drain();
    let phases: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::PhaseChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![
            HandshakeState::TransportConnected,
            HandshakeState::SessionOpened,
            HandshakeState::DeviceInfoFetched,
            HandshakeState::ExtensionStarted,
            HandshakeState::ExtensionConfirmed,
            HandshakeState::ExtensionInfoFetched,
            HandshakeState::ExtensionNegotiated,
            HandshakeState::Ready,
        ]
    );
    assert!(events.contains(&SessionEvent::HandshakeComplete));
}

#[tokio::test]
async fn second_sdio_connect_failure_aborts_before_info_fetch() {
    let mock = sdio_camera();
    mock.queue_reply(OP_SDIO_CONNECT, MockReply::ok());
    mock.queue_reply(OP_SDIO_CONNECT, MockReply::error(ResponseCode::GENERAL_ERROR));

    let harness = Harness::new();
    let err = harness.connect(&mock, &config(true)).await.err().unwrap();

    assert!(matches!(
        err,
        HandshakeError::CommandRequestFailed(ResponseCode::GENERAL_ERROR)
    ));
    assert!(mock.requests_for(OP_SDIO_GET_EXT_DEVICE_INFO).is_empty());
    assert_eq!(mock.requests_for(OP_SDIO_CONNECT).len(), 2);
}

#[tokio::test]
async fn open_session_failure_is_command_request_failed() {
    let mock = sdio_camera();
    mock.queue_reply(OP_OPEN_SESSION, MockReply::error(ResponseCode::SESSION_ALREADY_OPEN));

    let err = Harness::new().connect(&mock, &config(true)).await.err().unwrap();
    assert!(matches!(
        err,
        HandshakeError::CommandRequestFailed(ResponseCode::SESSION_ALREADY_OPEN)
    ));
    assert!(mock.requests_for(OP_GET_DEVICE_INFO).is_empty());
}

#[tokio::test]
async fn undecodable_device_info_fails_handshake() {
    let mock = MockTransport::new();
    mock.queue_reply(OP_GET_DEVICE_INFO, MockReply::ok_with_data(vec![0x64, 0x00, 0x11]));

    let err = Harness::new().connect(&mock, &config(true)).await.err().unwrap();
    assert!(matches!(err, HandshakeError::FetchDeviceInfoFailed(_)));
}

#[tokio::test]
async fn undecodable_ext_info_fails_handshake() {
    let mock = MockTransport::new();
    mock.queue_reply(
        OP_GET_DEVICE_INFO,
        MockReply::ok_with_data(device_info(STANDARD_OPS, &[]).to_bytes()),
    );
    mock.queue_reply(OP_SDIO_GET_EXT_DEVICE_INFO, MockReply::ok_with_data(vec![1]));

    let err = Harness::new().connect(&mock, &config(true)).await.err().unwrap();
    assert!(matches!(err, HandshakeError::FetchSdioExtDeviceInfoFailed(_)));
}

#[tokio::test]
async fn init_rejection_surfaces_as_transport_error() {
    let mock = MockTransport::new();
    mock.reject_init(1);
    let err = Harness::new().connect(&mock, &config(true)).await.err().unwrap();
    assert!(matches!(
        err,
        HandshakeError::Transport(ptpip_core::TransportError::InitRejected(1))
    ));
}

#[tokio::test]
async fn standard_device_skips_extension_and_prefetches() {
    let mock = MockTransport::new();
    mock.queue_reply(
        OP_GET_DEVICE_INFO,
        MockReply::ok_with_data(
            device_info(&[OP_GET_DEVICE_INFO, OP_OPEN_SESSION, OP_GET_DEVICE_PROP_DESC], &[0x5007])
                .to_bytes(),
        ),
    );
    let aperture = u16_property(0x5007, 280, &[280, 400, 560]);
    mock.queue_reply(
        OP_GET_DEVICE_PROP_DESC,
        MockReply::ok_with_data(aperture.to_bytes(PropertyLayout::Standard)),
    );

    let camera = Harness::new().connect(&mock, &config(true)).await.unwrap();

    assert!(mock.requests_for(OP_SDIO_CONNECT).is_empty());
    assert!(camera.ext_info().is_none());
    match camera.prefetch() {
        PrefetchOutcome::Fetched(event) => {
            assert_eq!(event.get(0x5007).unwrap().current, PropertyValue::UInt16(280));
        }
        other => panic!("unexpected prefetch outcome {:?}", other),
    }
    assert_eq!(
        camera.last_event().unwrap().get(0x5007).unwrap().supported_values().len(),
        3
    );
}

#[tokio::test]
async fn failed_prefetch_does_not_fail_connect() {
    let mock = sdio_camera();
    // Vendor single fetch is advertised but the device refuses it.
    mock.queue_reply(
        OP_SDIO_GET_EXT_DEVICE_PROP_INFO,
        MockReply::error(ResponseCode::DEVICE_PROP_NOT_SUPPORTED),
    );

    let camera = Harness::new().connect(&mock, &config(true)).await.unwrap();
    match camera.prefetch() {
        PrefetchOutcome::Skipped(ptpip_core::ClientError::Protocol { code, .. }) => {
            assert_eq!(*code, ResponseCode::DEVICE_PROP_NOT_SUPPORTED);
        }
        other => panic!("unexpected prefetch outcome {:?}", other),
    }
    assert!(camera.last_event().is_none());
    assert!(camera.is_connected());
}

#[tokio::test]
async fn each_advance_is_one_round_trip() {
    let mock = sdio_camera();
    let (client, _incoming) = PtpIpClient::connect(&mock, ClientOptions::default()).await.unwrap();
    let observer = NullObserver;
    let mut handshake = Handshake::new(&client, &observer).with_prefetch(false);
    assert_eq!(handshake.state(), HandshakeState::TransportConnected);
    assert!(handshake.device_info().is_none());

    let steps = [
        (HandshakeState::SessionOpened, 1),
        (HandshakeState::DeviceInfoFetched, 2),
        (HandshakeState::ExtensionStarted, 3),
        (HandshakeState::ExtensionConfirmed, 4),
        (HandshakeState::ExtensionInfoFetched, 5),
        (HandshakeState::ExtensionNegotiated, 6),
    ];
    for (expected, requests) in steps {
        assert_eq!(handshake.advance().await.unwrap(), expected);
        assert_eq!(handshake.state(), expected);
        assert_eq!(mock.requests().len(), requests, "after {}", expected);
        assert!(handshake.prefetch().is_none());
    }
    assert_eq!(handshake.device_info().unwrap().model, "ILCE-7M3");
    assert!(
        handshake
            .device_info()
            .unwrap()
            .supports_operation(OP_SDIO_GET_EXT_DEVICE_PROP_INFO)
    );

    // Completion is local: no request goes out.
    assert_eq!(handshake.advance().await.unwrap(), HandshakeState::Ready);
    assert_eq!(mock.requests().len(), 6);
    assert!(matches!(handshake.prefetch(), Some(PrefetchOutcome::Disabled)));
    assert_eq!(handshake.advance().await.unwrap(), HandshakeState::Ready);
}

#[tokio::test]
async fn malformed_open_session_response_fails_without_timeout() {
    let mock = sdio_camera();
    mock.queue_reply(OP_OPEN_SESSION, MockReply::Silent);
    let harness = Harness::new();
    let cfg = config(false);

    let (result, _) = tokio::join!(harness.connect(&mock, &cfg), async {
        while mock.requests().is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        // Response code with the transaction id cut short.
        mock.push_raw(false, vec![12, 0, 0, 0, 7, 0, 0, 0, 0x01, 0x20, 0x00, 0x00]);
    });

    let err = result.err().unwrap();
    assert!(matches!(err, HandshakeError::Client(ClientError::Decode(_))));
    assert!(mock.requests_for(OP_GET_DEVICE_INFO).is_empty());
}
