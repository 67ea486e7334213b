#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use ptpip_core::events::{FileRetriever, SessionEvent, SessionObserver, ShootingMode};
use ptpip_core::protocol::{
    DATATYPE_UINT16, DeviceInfo, DeviceProperty, ObjectHandle, OperationCode, PropertyCode,
    PropertyForm, PropertyValue, SdioExtDeviceInfo,
};
use ptpip_core::{Camera, CameraConfig, HandshakeError, MockTransport};
use tokio::sync::mpsc;

pub fn device_info(ops: &[OperationCode], props: &[PropertyCode]) -> DeviceInfo {
    DeviceInfo {
        standard_version: 100,
        vendor_extension_id: 0x11,
        vendor_extension_version: 100,
        vendor_extension_desc: "Sony PTP Extensions".into(),
        supported_operations: ops.iter().copied().collect(),
        supported_properties: props.iter().copied().collect(),
        manufacturer: "Sony Corporation".into(),
        model: "ILCE-7M3".into(),
        device_version: "3.01".into(),
        serial_number: "00000000000000003282933003283459".into(),
        ..Default::default()
    }
}

pub fn ext_info(ops: &[OperationCode], props: &[PropertyCode]) -> SdioExtDeviceInfo {
    SdioExtDeviceInfo {
        version: 300,
        operations: ops.iter().copied().collect(),
        properties: props.iter().copied().collect(),
        ..Default::default()
    }
}

pub fn u16_property(code: PropertyCode, current: u16, choices: &[u16]) -> DeviceProperty {
    let values: Vec<_> = choices.iter().map(|v| PropertyValue::UInt16(*v)).collect();
    DeviceProperty {
        code,
        data_type: DATATYPE_UINT16,
        writable: true,
        enabled: true,
        factory_default: PropertyValue::UInt16(current),
        current: PropertyValue::UInt16(current),
        form: PropertyForm::Enumeration {
            supported: values.clone(),
            available: values,
        },
    }
}

pub fn config(prefetch_event: bool) -> CameraConfig {
    CameraConfig {
        command_timeout_ms: 500,
        connect_timeout_ms: 1_000,
        prefetch_event,
        ..Default::default()
    }
}

/// Observer and retriever that forward everything to channels.
pub struct Recorder {
    events: mpsc::UnboundedSender<SessionEvent>,
    retrievals: mpsc::UnboundedSender<(ObjectHandle, ShootingMode)>,
}

impl SessionObserver for Recorder {
    fn on_event(&self, event: &SessionEvent) {
        let _ = self.events.send(event.clone());
    }
}

impl FileRetriever for Recorder {
    fn retrieve(&self, handle: ObjectHandle, mode: ShootingMode) {
        let _ = self.retrievals.send((handle, mode));
    }
}

pub struct Harness {
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
    pub retrievals: mpsc::UnboundedReceiver<(ObjectHandle, ShootingMode)>,
    recorder: Arc<Recorder>,
}

impl Harness {
    pub fn new() -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();
        let (retrievals_tx, retrievals) = mpsc::unbounded_channel();
        Self {
            events,
            retrievals,
            recorder: Arc::new(Recorder {
                events: events_tx,
                retrievals: retrievals_tx,
            }),
        }
    }

    pub async fn connect(
        &self,
        mock: &MockTransport,
        config: &CameraConfig,
    ) -> Result<Camera, HandshakeError> {
        Camera::connect_with(mock, config, self.recorder.clone(), self.recorder.clone()).await
    }

    /// Next session event matching `pred`, skipping the rest.
    pub async fn wait_for(&mut self, pred: impl Fn(&SessionEvent) -> bool) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match self.events.recv().await {
                    Some(event) if pred(&event) => return event,
                    Some(_) => continue,
                    None => panic!("observer dropped"),
                }
            }
        })
        .await
        .expect("timed out waiting for session event")
    }

    /// Everything observed so far, without waiting.
    pub fn drain(&mut self) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}
