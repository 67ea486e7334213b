//! Mock transport for testing.
//!
//! Backs both channels with in-memory duplex pipes and answers them from a
//! scripted camera task. Must be created inside a tokio runtime.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

use super::traits::{Transport, TransportError};
use crate::protocol::{
    DataContainer, EventPacket, FrameBuffer, InitCommandAck, OperationCode, OperationRequest,
    OperationResponse, PTPIP_VERSION, Packet, ResponseCode,
};

/// How the mock camera answers one operation.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Optional data phase followed by a response.
    Respond {
        code: ResponseCode,
        data: Option<Vec<u8>>,
    },
    /// Swallow the request.
    Silent,
}

impl MockReply {
    pub fn ok() -> Self {
        MockReply::Respond {
            code: ResponseCode::OK,
            data: None,
        }
    }

    pub fn ok_with_data(data: Vec<u8>) -> Self {
        MockReply::Respond {
            code: ResponseCode::OK,
            data: Some(data),
        }
    }

    pub fn error(code: ResponseCode) -> Self {
        MockReply::Respond { code, data: None }
    }
}

/// An operation request as seen by the mock camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub request: OperationRequest,
    /// Host-to-device data phase, if any.
    pub data: Option<Vec<u8>>,
}

#[derive(Default)]
struct MockState {
    replies: HashMap<OperationCode, VecDeque<MockReply>>,
    requests: Vec<RecordedRequest>,
    init_fail: Option<u32>,
}

enum Control {
    Event(EventPacket),
    Raw { event_channel: bool, bytes: Vec<u8> },
    Disconnect,
}

/// Mock transport for exercising the client, handshake and dispatcher.
pub struct MockTransport {
    command: Mutex<Option<DuplexStream>>,
    event: Mutex<Option<DuplexStream>>,
    state: Arc<Mutex<MockState>>,
    control: mpsc::UnboundedSender<Control>,
}

impl MockTransport {
    pub fn new() -> Self {
        let (command_host, command_device) = tokio::io::duplex(64 * 1024);
        let (event_host, event_device) = tokio::io::duplex(64 * 1024);
        let state = Arc::new(Mutex::new(MockState::default()));
        let (control, control_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_camera(
            command_device,
            event_device,
            state.clone(),
            control_rx,
        ));

        Self {
            command: Mutex::new(Some(command_host)),
            event: Mutex::new(Some(event_host)),
            state,
            control,
        }
    }

    /// Queue a reply for the next request with `code`. Unscripted requests
    /// get a plain OK.
    pub fn queue_reply(&self, code: OperationCode, reply: MockReply) {
        self.lock()
            .replies
            .entry(code)
            .or_default()
            .push_back(reply);
    }

    /// Answer the init command request with InitFail.
    pub fn reject_init(&self, reason: u32) {
        self.lock().init_fail = Some(reason);
    }

    /// Every operation request received so far, in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    pub fn requests_for(&self, code: OperationCode) -> Vec<RecordedRequest> {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.request.code == code)
            .cloned()
            .collect()
    }

    /// Send an event on the event channel.
    pub fn push_event(&self, event: EventPacket) {
        let _ = self.control.send(Control::Event(event));
    }

    /// Write raw bytes to the host, bypassing the codec.
    pub fn push_raw(&self, event_channel: bool, bytes: Vec<u8>) {
        let _ = self.control.send(Control::Raw {
            event_channel,
            bytes,
        });
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        let _ = self.control.send(Control::Disconnect);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Transport for MockTransport {
    type Stream = DuplexStream;

    async fn open_command(&self) -> Result<DuplexStream, TransportError> {
        take_stream(&self.command)
    }

    async fn open_event(&self) -> Result<DuplexStream, TransportError> {
        take_stream(&self.event)
    }

    fn endpoint(&self) -> String {
        "mock".to_string()
    }
}

fn take_stream(slot: &Mutex<Option<DuplexStream>>) -> Result<DuplexStream, TransportError> {
    slot.lock()
        .unwrap_or_else(|e| e.into_inner())
        .take()
        .ok_or_else(|| TransportError::ConnectFailed {
            addr: "mock".into(),
            message: "channel already opened".into(),
        })
}

async fn run_camera(
    mut command: DuplexStream,
    mut event: DuplexStream,
    state: Arc<Mutex<MockState>>,
    mut control: mpsc::UnboundedReceiver<Control>,
) {
    let mut command_frames = FrameBuffer::new();
    let mut event_frames = FrameBuffer::new();
    let mut command_buf = vec![0u8; 16 * 1024];
    let mut event_buf = vec![0u8; 1024];
    let mut data_out: Option<(OperationRequest, Vec<u8>)> = None;

    loop {
        tokio::select! {
            n = command.read(&mut command_buf) => {
                let n = match n {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                let (frames, corrupt) = command_frames.push(&command_buf[..n]);
                for packet in frames.into_iter().flatten() {
                    let replies = match packet {
                        Packet::InitCommandRequest(req) => {
                            let init_fail = state.lock().unwrap_or_else(|e| e.into_inner()).init_fail;
                            match init_fail {
                                Some(reason) => vec![Packet::InitFail { reason }],
                                None => vec![Packet::InitCommandAck(InitCommandAck {
                                    connection_number: 1,
                                    guid: req.guid,
                                    name: "MockCamera".into(),
                                    version: PTPIP_VERSION,
                                })],
                            }
                        }
                        Packet::OperationRequest(req) if req.has_data_out() => {
                            data_out = Some((req, Vec::new()));
                            Vec::new()
                        }
                        Packet::OperationRequest(req) => answer(&state, req, None),
                        Packet::Data(chunk) => {
                            if let Some((_, buf)) = data_out.as_mut() {
                                buf.extend_from_slice(&chunk.payload);
                            }
                            Vec::new()
                        }
                        Packet::EndData(chunk) => match data_out.take() {
                            Some((req, mut buf)) => {
                                buf.extend_from_slice(&chunk.payload);
                                answer(&state, req, Some(buf))
                            }
                            None => Vec::new(),
                        },
                        _ => Vec::new(),
                    };
                    for reply in replies {
                        if command.write_all(&reply.encode()).await.is_err() {
                            return;
                        }
                    }
                }
                if corrupt.is_some() {
                    return;
                }
            }
            n = event.read(&mut event_buf) => {
                let n = match n {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                let (frames, corrupt) = event_frames.push(&event_buf[..n]);
                for packet in frames.into_iter().flatten() {
                    if let Packet::InitEventRequest { .. } = packet
                        && event.write_all(&Packet::InitEventAck.encode()).await.is_err()
                    {
                        return;
                    }
                }
                if corrupt.is_some() {
                    return;
                }
            }
            ctl = control.recv() => {
                let written = match ctl {
                    Some(Control::Event(e)) => event.write_all(&Packet::Event(e).encode()).await,
                    Some(Control::Raw { event_channel: true, bytes }) => event.write_all(&bytes).await,
                    Some(Control::Raw { event_channel: false, bytes }) => command.write_all(&bytes).await,
                    Some(Control::Disconnect) | None => return,
                };
                if written.is_err() {
                    return;
                }
            }
        }
    }
}

fn answer(
    state: &Arc<Mutex<MockState>>,
    request: OperationRequest,
    data: Option<Vec<u8>>,
) -> Vec<Packet> {
    let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
    let transaction_id = request.transaction_id;
    let reply = state
        .replies
        .get_mut(&request.code)
        .and_then(|q| q.pop_front())
        .unwrap_or_else(MockReply::ok);
    state.requests.push(RecordedRequest { request, data });

    match reply {
        MockReply::Silent => Vec::new(),
        MockReply::Respond { code, data } => {
            let mut packets = Vec::new();
            if let Some(payload) = data {
                packets.push(Packet::StartData {
                    transaction_id,
                    total_length: payload.len() as u64,
                });
                packets.push(Packet::EndData(DataContainer {
                    transaction_id,
                    payload,
                }));
            }
            packets.push(Packet::OperationResponse(OperationResponse::new(
                code,
                transaction_id,
            )));
            packets
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}
