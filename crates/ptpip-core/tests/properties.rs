mod common;

use common::{Harness, config, device_info, u16_property};
use ptpip_core::protocol::*;
use ptpip_core::transport::{MockReply, MockTransport};
use ptpip_core::{Camera, ClientError};

async fn camera_with(ops: &[OperationCode], props: &[PropertyCode], mock: &MockTransport) -> Camera {
    mock.queue_reply(
        OP_GET_DEVICE_INFO,
        MockReply::ok_with_data(device_info(ops, props).to_bytes()),
    );
    Harness::new().connect(mock, &config(false)).await.unwrap()
}

#[tokio::test]
async fn vendor_only_device_uses_vendor_fetch() {
    let mock = MockTransport::new();
    let camera = camera_with(
        &[OP_GET_DEVICE_INFO, OP_OPEN_SESSION, OP_SDIO_GET_EXT_DEVICE_PROP_INFO],
        &[0x5007],
        &mock,
    )
    .await;
    let aperture = u16_property(0x5007, 400, &[280, 400]);
    mock.queue_reply(
        OP_SDIO_GET_EXT_DEVICE_PROP_INFO,
        MockReply::ok_with_data(aperture.to_bytes(PropertyLayout::Vendor)),
    );

    let property = camera.get_property(0x5007).await.unwrap();
    assert_eq!(property, aperture);

    let vendor = mock.requests_for(OP_SDIO_GET_EXT_DEVICE_PROP_INFO);
    assert_eq!(vendor.len(), 1);
    assert_eq!(vendor[0].request.args, vec![0x5007]);
    assert!(mock.requests_for(OP_GET_DEVICE_PROP_DESC).is_empty());
}

#[tokio::test]
async fn batch_fetch_searches_locally() {
    let mock = MockTransport::new();
    let camera = camera_with(
        &[
            OP_GET_DEVICE_INFO,
            OP_SDIO_GET_ALL_EXT_DEVICE_PROP_INFO,
            OP_SDIO_GET_EXT_DEVICE_PROP_INFO,
        ],
        &[],
        &mock,
    )
    .await;
    let batch = DeviceProperty::encode_all(&[
        u16_property(0x5007, 400, &[280, 400]),
        u16_property(0xD21E, 100, &[100, 200, 400]),
    ]);
    mock.queue_reply(OP_SDIO_GET_ALL_EXT_DEVICE_PROP_INFO, MockReply::ok_with_data(batch.clone()));
    mock.queue_reply(OP_SDIO_GET_ALL_EXT_DEVICE_PROP_INFO, MockReply::ok_with_data(batch));

    let iso = camera.get_property(0xD21E).await.unwrap();
    assert_eq!(iso.current, PropertyValue::UInt16(100));

    let err = camera.get_property(0x500A).await.unwrap_err();
    assert!(matches!(err, ClientError::PropertyNotFound(0x500A)));
    assert!(mock.requests_for(OP_SDIO_GET_EXT_DEVICE_PROP_INFO).is_empty());
}

#[tokio::test]
async fn no_fetch_operation_is_not_supported() {
    let mock = MockTransport::new();
    let camera = camera_with(&[OP_GET_DEVICE_INFO, OP_OPEN_SESSION], &[0x5007], &mock).await;

    let err = camera.get_property(0x5007).await.unwrap_err();
    assert!(matches!(err, ClientError::OperationNotSupported { .. }));
    assert!(matches!(
        camera.set_property(0x5007, &PropertyValue::UInt16(1)).await,
        Err(ClientError::OperationNotSupported { .. })
    ));
}

#[tokio::test]
async fn set_property_sends_value_in_data_phase() {
    let mock = MockTransport::new();
    let camera = camera_with(
        &[OP_GET_DEVICE_INFO, OP_SET_DEVICE_PROP_VALUE, OP_SDIO_SET_EXT_DEVICE_PROP_VALUE],
        &[],
        &mock,
    )
    .await;

    camera
        .set_property(0xD21E, &PropertyValue::UInt32(800))
        .await
        .unwrap();

    let writes = mock.requests_for(OP_SDIO_SET_EXT_DEVICE_PROP_VALUE);
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].request.args, vec![0xD21E]);
    assert!(writes[0].request.has_data_out());
    assert_eq!(writes[0].data, Some(800u32.to_le_bytes().to_vec()));
    assert!(mock.requests_for(OP_SET_DEVICE_PROP_VALUE).is_empty());
}

#[tokio::test]
async fn rejected_write_carries_response_code() {
    let mock = MockTransport::new();
    let camera = camera_with(&[OP_GET_DEVICE_INFO, OP_SET_DEVICE_PROP_VALUE], &[], &mock).await;
    mock.queue_reply(OP_SET_DEVICE_PROP_VALUE, MockReply::error(ResponseCode::DEVICE_BUSY));

    let err = camera
        .set_property(0x5007, &PropertyValue::UInt16(560))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::Protocol { op: OP_SET_DEVICE_PROP_VALUE, code: ResponseCode::DEVICE_BUSY }
    ));
    assert!(camera.is_connected());
}

#[tokio::test]
async fn silent_device_times_out_and_connection_survives() {
    let mock = MockTransport::new();
    let camera = camera_with(&[OP_GET_DEVICE_INFO, OP_GET_DEVICE_PROP_DESC], &[], &mock).await;
    mock.queue_reply(OP_GET_DEVICE_PROP_DESC, MockReply::Silent);
    mock.queue_reply(
        OP_GET_DEVICE_PROP_DESC,
        MockReply::ok_with_data(u16_property(0x5007, 1, &[1]).to_bytes(PropertyLayout::Standard)),
    );

    let err = camera.get_property(0x5007).await.unwrap_err();
    assert!(matches!(err, ClientError::Timeout { op: OP_GET_DEVICE_PROP_DESC, .. }));

    let property = camera.get_property(0x5007).await.unwrap();
    assert_eq!(property.current, PropertyValue::UInt16(1));
}

#[tokio::test]
async fn fetch_event_updates_last_event() {
    let mock = MockTransport::new();
    let camera = camera_with(
        &[OP_GET_DEVICE_INFO, OP_SDIO_GET_ALL_EXT_DEVICE_PROP_INFO],
        &[],
        &mock,
    )
    .await;
    assert!(camera.last_event().is_none());
    mock.queue_reply(
        OP_SDIO_GET_ALL_EXT_DEVICE_PROP_INFO,
        MockReply::ok_with_data(DeviceProperty::encode_all(&[u16_property(0x500E, 2, &[1, 2])])),
    );

    let event = camera.fetch_event().await.unwrap();
    assert_eq!(event.len(), 1);
    assert_eq!(camera.last_event(), Some(event));
}
