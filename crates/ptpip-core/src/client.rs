//! PTP/IP client connection.
//!
//! Owns both channels of one connection. A single receive loop task reads
//! the command and event channels, resolves transactions in the registry
//! and forwards unsolicited events; a writer task serialises everything
//! sent on the command channel.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, instrument, trace, warn};

use crate::protocol::{
    DataContainer, DecodeError, EventPacket, FrameBuffer, InitCommandRequest, OperationCode,
    OperationRequest, PTPIP_VERSION, Packet, ResponseCode, TransactionId,
    frame_buffer::{BadFrame, FrameResult}, operation_name,
};
use crate::registry::{Completion, CompletionReceiver, RegistryError, TransactionRegistry};
use crate::transport::{DisconnectReason, Transport, TransportError};

/// Per-operation error.
///
/// Cloneable so one teardown can fail every pending transaction.
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(Arc<TransportError>),

    #[error("Malformed payload: {0}")]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Operation 0x{op:04X} failed: {code}")]
    Protocol {
        op: OperationCode,
        code: ResponseCode,
    },

    #[error("Device offers no operation for {action}")]
    OperationNotSupported { action: &'static str },

    #[error("Property 0x{0:04X} not found")]
    PropertyNotFound(u16),

    #[error("Operation 0x{op:04X} timed out after {timeout_ms}ms")]
    Timeout { op: OperationCode, timeout_ms: u64 },

    #[error("Transaction {0} cancelled by device")]
    Cancelled(TransactionId),

    #[error("Disconnected: {0}")]
    Disconnected(DisconnectReason),
}

impl From<TransportError> for ClientError {
    fn from(e: TransportError) -> Self {
        ClientError::Transport(Arc::new(e))
    }
}

/// What the connection hands to its consumer outside of transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Event(EventPacket),
    /// Sent once, after every pending transaction has been failed.
    Disconnected(DisconnectReason),
}

/// Which response completes a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMatch {
    /// The response carrying the request's transaction id.
    Transaction,
    /// The first response seen, whatever its id. Only OpenSession needs this.
    AnyResponse,
}

/// Connection parameters.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub guid: [u8; 16],
    pub name: String,
    /// Per-transaction wait.
    pub command_timeout: Duration,
    /// Bound on the init exchange of both channels.
    pub init_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            guid: [0; 16],
            name: "ptpip".to_string(),
            command_timeout: Duration::from_secs(10),
            init_timeout: Duration::from_secs(5),
        }
    }
}

struct ConnectionState {
    registry: TransactionRegistry,
    closed: Option<DisconnectReason>,
}

struct Shared {
    state: Mutex<ConnectionState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One live PTP/IP connection.
pub struct PtpIpClient {
    shared: Arc<Shared>,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    shutdown: mpsc::UnboundedSender<DisconnectReason>,
    connection_number: u32,
    device_name: String,
    command_timeout: Duration,
}

impl PtpIpClient {
    /// Open both channels, run the init exchange and start the receive loop.
    ///
    /// Must be called inside a tokio runtime. Unsolicited traffic arrives on
    /// the returned receiver.
    #[instrument(skip_all, fields(endpoint = %transport.endpoint()))]
    pub async fn connect<T: Transport>(
        transport: &T,
        options: ClientOptions,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Incoming>), TransportError> {
        let init_timeout = options.init_timeout;
        tokio::time::timeout(init_timeout, Self::establish(transport, options))
            .await
            .map_err(|_| TransportError::Timeout {
                timeout_ms: init_timeout.as_millis() as u64,
            })?
    }

    async fn establish<T: Transport>(
        transport: &T,
        options: ClientOptions,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Incoming>), TransportError> {
        let (command_read, mut command_write) = tokio::io::split(transport.open_command().await?);
        let mut command_reader = ChannelReader::new(command_read);

        let request = Packet::InitCommandRequest(InitCommandRequest {
            guid: options.guid,
            name: options.name.clone(),
            version: PTPIP_VERSION,
        });
        command_write.write_all(&request.encode()).await?;

        let ack = match command_reader.next_init().await? {
            Packet::InitCommandAck(ack) => ack,
            Packet::InitFail { reason } => return Err(TransportError::InitRejected(reason)),
            other => {
                return Err(TransportError::UnexpectedPacket {
                    expected: "InitCommandAck",
                    got: other.name(),
                });
            }
        };
        info!(
            connection_number = ack.connection_number,
            device = %ack.name,
            "Command channel initialised"
        );

        let (event_read, mut event_write) = tokio::io::split(transport.open_event().await?);
        let mut event_reader = ChannelReader::new(event_read);
        let request = Packet::InitEventRequest {
            connection_number: ack.connection_number,
        };
        event_write.write_all(&request.encode()).await?;

        match event_reader.next_init().await? {
            Packet::InitEventAck => {}
            Packet::InitFail { reason } => return Err(TransportError::InitRejected(reason)),
            other => {
                return Err(TransportError::UnexpectedPacket {
                    expected: "InitEventAck",
                    got: other.name(),
                });
            }
        }
        info!("Event channel initialised");

        let shared = Arc::new(Shared {
            state: Mutex::new(ConnectionState {
                registry: TransactionRegistry::new(),
                closed: None,
            }),
        });
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = mpsc::unbounded_channel();
        let (incoming, incoming_rx) = mpsc::unbounded_channel();

        let writer = tokio::spawn(write_loop(command_write, outgoing_rx, shutdown.clone()));
        tokio::spawn(receive_loop(
            ReceiveLoop {
                command: command_reader,
                event: event_reader,
                event_write,
                shared: shared.clone(),
                incoming,
                outgoing: outgoing.clone(),
                shutdown: shutdown_rx,
            },
            writer.abort_handle(),
        ));

        let client = Self {
            shared,
            outgoing,
            shutdown,
            connection_number: ack.connection_number,
            device_name: ack.name,
            command_timeout: options.command_timeout,
        };
        Ok((client, incoming_rx))
    }

    pub fn connection_number(&self) -> u32 {
        self.connection_number
    }

    /// Friendly name from the InitCommandAck.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Draw the next transaction id from the counter.
    pub fn next_transaction_id(&self) -> TransactionId {
        self.shared.lock().registry.next_id()
    }

    /// Value the next draw will return.
    pub fn current_transaction_id(&self) -> TransactionId {
        self.shared.lock().registry.peek_id()
    }

    pub fn reset_transaction_id(&self, to: TransactionId) {
        self.shared.lock().registry.reset(to);
    }

    pub fn is_connected(&self) -> bool {
        self.shared.lock().closed.is_none()
    }

    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.shared.lock().closed.clone()
    }

    /// Write a request without waiting for its response.
    pub fn send(&self, request: OperationRequest) -> Result<(), ClientError> {
        trace!(op = operation_name(request.code), transaction_id = request.transaction_id, "TX request");
        self.write(Packet::OperationRequest(request))
    }

    /// Send a request and wait for its completion.
    ///
    /// On timeout the registration is removed; the device side of the
    /// operation is not aborted.
    pub async fn transact(
        &self,
        request: OperationRequest,
        matching: ResponseMatch,
    ) -> Result<Completion, ClientError> {
        let (op, id) = (request.code, request.transaction_id);
        let rx = self.register(id, matching)?;
        if let Err(e) = self.send(request) {
            self.unregister(id, matching);
            return Err(e);
        }
        self.wait(rx, op, id, matching).await
    }

    /// Send a request followed by a host-to-device data phase.
    pub async fn transact_with_data(
        &self,
        request: OperationRequest,
        data: Vec<u8>,
    ) -> Result<Completion, ClientError> {
        let request = request.with_data_out();
        let (op, id) = (request.code, request.transaction_id);
        let rx = self.register(id, ResponseMatch::Transaction)?;

        let sent = self.send(request).and_then(|_| {
            self.write(Packet::StartData {
                transaction_id: id,
                total_length: data.len() as u64,
            })?;
            self.write(Packet::EndData(DataContainer {
                transaction_id: id,
                payload: data,
            }))
        });
        if let Err(e) = sent {
            self.unregister(id, ResponseMatch::Transaction);
            return Err(e);
        }
        self.wait(rx, op, id, ResponseMatch::Transaction).await
    }

    /// Run `code` with the next transaction id and require an OK response.
    pub async fn execute(
        &self,
        code: OperationCode,
        args: impl IntoIterator<Item = u32>,
    ) -> Result<Completion, ClientError> {
        let request = OperationRequest::new(code, args, self.next_transaction_id());
        let completion = self.transact(request, ResponseMatch::Transaction).await?;
        require_ok(code, completion)
    }

    /// Like `execute`, with a host-to-device data phase.
    pub async fn execute_with_data(
        &self,
        code: OperationCode,
        args: impl IntoIterator<Item = u32>,
        data: Vec<u8>,
    ) -> Result<Completion, ClientError> {
        let request = OperationRequest::new(code, args, self.next_transaction_id());
        let completion = self.transact_with_data(request, data).await?;
        require_ok(code, completion)
    }

    /// Stop the receive loop. Pending transactions fail with
    /// `Disconnected(Requested)`.
    pub fn disconnect(&self) {
        let _ = self.shutdown.send(DisconnectReason::Requested);
    }

    fn register(
        &self,
        id: TransactionId,
        matching: ResponseMatch,
    ) -> Result<CompletionReceiver, ClientError> {
        let mut state = self.shared.lock();
        if let Some(reason) = &state.closed {
            return Err(ClientError::Disconnected(reason.clone()));
        }
        let rx = match matching {
            ResponseMatch::Transaction => state.registry.register(id)?,
            ResponseMatch::AnyResponse => state.registry.register_any()?,
        };
        Ok(rx)
    }

    fn unregister(&self, id: TransactionId, matching: ResponseMatch) {
        let mut state = self.shared.lock();
        match matching {
            ResponseMatch::Transaction => {
                state.registry.cancel(id);
            }
            ResponseMatch::AnyResponse => state.registry.cancel_any(),
        }
    }

    async fn wait(
        &self,
        rx: CompletionReceiver,
        op: OperationCode,
        id: TransactionId,
        matching: ResponseMatch,
    ) -> Result<Completion, ClientError> {
        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped without an answer: the loop is gone.
            Ok(Err(_)) => Err(ClientError::Disconnected(
                self.disconnect_reason().unwrap_or(DisconnectReason::Closed),
            )),
            Err(_) => {
                self.unregister(id, matching);
                warn!(op = operation_name(op), transaction_id = id, "Transaction timed out");
                Err(ClientError::Timeout {
                    op,
                    timeout_ms: self.command_timeout.as_millis() as u64,
                })
            }
        }
    }

    fn write(&self, packet: Packet) -> Result<(), ClientError> {
        self.outgoing.send(packet.encode()).map_err(|_| {
            ClientError::Disconnected(self.disconnect_reason().unwrap_or(DisconnectReason::Closed))
        })
    }
}

impl Drop for PtpIpClient {
    fn drop(&mut self) {
        let _ = self.shutdown.send(DisconnectReason::Requested);
    }
}

/// Map a non-OK response to `ClientError::Protocol`.
pub fn require_ok(op: OperationCode, completion: Completion) -> Result<Completion, ClientError> {
    let code = completion.response.code;
    if code.is_ok() {
        Ok(completion)
    } else {
        debug!(op = operation_name(op), %code, "Device returned error");
        Err(ClientError::Protocol { op, code })
    }
}

/// Frame reader over one channel.
struct ChannelReader<R> {
    stream: R,
    frames: FrameBuffer,
    ready: VecDeque<FrameResult>,
    /// Set once the stream is out of sync; reported after `ready` drains.
    corrupt: Option<DisconnectReason>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> ChannelReader<R> {
    fn new(stream: R) -> Self {
        Self {
            stream,
            frames: FrameBuffer::new(),
            ready: VecDeque::new(),
            corrupt: None,
            buf: vec![0u8; 64 * 1024],
        }
    }

    /// Next framed packet. Cancel safe: bytes read are queued before the
    /// next await point.
    async fn next(&mut self) -> Result<FrameResult, DisconnectReason> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Ok(frame);
            }
            if let Some(reason) = &self.corrupt {
                return Err(reason.clone());
            }
            let n = self
                .stream
                .read(&mut self.buf)
                .await
                .map_err(|e| DisconnectReason::ReadFailed(e.to_string()))?;
            if n == 0 {
                return Err(DisconnectReason::Closed);
            }
            let (frames, corrupt) = self.frames.push(&self.buf[..n]);
            self.ready.extend(frames);
            self.corrupt = corrupt.map(|e| DisconnectReason::Corrupt(e.to_string()));
        }
    }

    async fn next_init(&mut self) -> Result<Packet, TransportError> {
        match self.next().await {
            Ok(frame) => Ok(frame.map_err(|bad| bad.error)?),
            Err(DisconnectReason::Closed) => Err(TransportError::Disconnected),
            Err(reason) => Err(TransportError::ReadFailed(reason.to_string())),
        }
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(
    mut stream: W,
    mut outgoing: mpsc::UnboundedReceiver<Vec<u8>>,
    shutdown: mpsc::UnboundedSender<DisconnectReason>,
) {
    while let Some(frame) = outgoing.recv().await {
        if let Err(e) = stream.write_all(&frame).await {
            let _ = shutdown.send(DisconnectReason::WriteFailed(e.to_string()));
            return;
        }
    }
}

struct ReceiveLoop<S> {
    command: ChannelReader<ReadHalf<S>>,
    event: ChannelReader<ReadHalf<S>>,
    event_write: WriteHalf<S>,
    shared: Arc<Shared>,
    incoming: mpsc::UnboundedSender<Incoming>,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    shutdown: mpsc::UnboundedReceiver<DisconnectReason>,
}

async fn receive_loop<S: AsyncRead + AsyncWrite + Unpin>(mut rl: ReceiveLoop<S>, writer: AbortHandle) {
    let reason = rl.run().await;
    writer.abort();

    {
        let mut state = rl.shared.lock();
        state.closed = Some(reason.clone());
        state
            .registry
            .fail_all(&ClientError::Disconnected(reason.clone()));
    }
    match &reason {
        DisconnectReason::Requested => info!("Connection closed"),
        _ => warn!(%reason, "Connection lost"),
    }
    let _ = rl.incoming.send(Incoming::Disconnected(reason));
}

impl<S: AsyncRead + AsyncWrite + Unpin> ReceiveLoop<S> {
    async fn run(&mut self) -> DisconnectReason {
        loop {
            let (channel, frame) = tokio::select! {
                frame = self.command.next() => ("command", frame),
                frame = self.event.next() => ("event", frame),
                reason = self.shutdown.recv() => {
                    return reason.unwrap_or(DisconnectReason::Requested);
                }
            };

            let packet = match frame {
                Ok(Ok(packet)) => packet,
                Ok(Err(bad)) => {
                    self.reject(channel, bad);
                    continue;
                }
                Err(reason) => return reason,
            };
            trace!(channel, packet = packet.name(), "RX");

            if let Err(reason) = self.dispatch(channel, packet).await {
                return reason;
            }
        }
    }

    /// Drop an undecodable frame. A malformed response still ends the
    /// transaction it was meant for.
    fn reject(&self, channel: &'static str, bad: BadFrame) {
        warn!(
            channel,
            kind = %format!("0x{:X}", bad.kind),
            error = %bad.error,
            "Dropping undecodable packet"
        );
        if bad.is_response() {
            self.shared
                .lock()
                .registry
                .fail_response(bad.transaction_id, ClientError::Decode(bad.error));
        }
    }

    async fn dispatch(&mut self, channel: &'static str, packet: Packet) -> Result<(), DisconnectReason> {
        match packet {
            Packet::OperationResponse(response) => {
                self.shared.lock().registry.resolve(response);
            }
            Packet::StartData {
                transaction_id,
                total_length,
            } => {
                self.shared
                    .lock()
                    .registry
                    .begin_data(transaction_id, total_length);
            }
            Packet::Data(chunk) | Packet::EndData(chunk) => {
                self.shared
                    .lock()
                    .registry
                    .append_data(chunk.transaction_id, &chunk.payload);
            }
            Packet::Cancel { transaction_id } => {
                self.shared
                    .lock()
                    .registry
                    .fail(transaction_id, ClientError::Cancelled(transaction_id));
            }
            Packet::Event(event) => {
                debug!(code = %format!("0x{:04X}", event.code), params = ?event.params, "Event");
                let _ = self.incoming.send(Incoming::Event(event));
            }
            Packet::ProbeRequest => {
                let reply = Packet::ProbeResponse.encode();
                if channel == "event" {
                    self.event_write
                        .write_all(&reply)
                        .await
                        .map_err(|e| DisconnectReason::WriteFailed(e.to_string()))?;
                } else {
                    let _ = self.outgoing.send(reply);
                }
            }
            other => {
                debug!(channel, packet = other.name(), "Ignoring unexpected packet");
            }
        }
        Ok(())
    }
}
