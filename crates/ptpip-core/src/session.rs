//! Camera session - connection, handshake and event dispatch for one device.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::access::{CameraEvent, PropertyAccess};
use crate::client::{ClientError, ClientOptions, Incoming, PtpIpClient};
use crate::events::{
    FileRetriever, LoggingRetriever, SessionEvent, SessionObserver, ShootingMode, TracingObserver,
};
use crate::protocol::{
    DeviceInfo, DeviceProperty, EventPacket, OP_CLOSE_SESSION, PTPIP_PORT, PropertyCode,
    PropertyValue, SdioExtDeviceInfo, TransactionId,
};
use crate::state::{EventDispatcher, EventState, Handshake, HandshakeError, PrefetchOutcome};
use crate::transport::{DisconnectReason, TcpTransport, Transport};

/// Configuration for a camera session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Camera address.
    pub host: String,
    pub port: u16,
    /// Friendly name sent in the init request.
    pub client_name: String,
    pub client_guid: [u8; 16],
    pub command_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Fetch a property snapshot once the handshake completes.
    pub prefetch_event: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            host: "192.168.122.1".to_string(),
            port: PTPIP_PORT,
            client_name: "ptpip".to_string(),
            client_guid: [0; 16],
            command_timeout_ms: 10_000,
            connect_timeout_ms: 5_000,
            prefetch_event: true,
        }
    }
}

impl CameraConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CameraConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            guid: self.client_guid,
            name: self.client_name.clone(),
            command_timeout: Duration::from_millis(self.command_timeout_ms),
            init_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }

    pub fn transport(&self) -> TcpTransport {
        TcpTransport::new(self.host.clone(), self.port)
            .connect_timeout(Duration::from_millis(self.connect_timeout_ms))
    }
}

/// A connected, handshaken camera.
///
/// Dropping it closes the connection without CloseSession; prefer
/// `disconnect`.
pub struct Camera {
    client: Arc<PtpIpClient>,
    device_info: DeviceInfo,
    ext_info: Option<SdioExtDeviceInfo>,
    prefetch: PrefetchOutcome,
    last_event: Mutex<Option<CameraEvent>>,
    events: Arc<Mutex<EventState>>,
    closed: watch::Receiver<Option<DisconnectReason>>,
    dispatcher: JoinHandle<()>,
}

impl Camera {
    /// Connect over TCP using `config`, logging session events.
    pub async fn connect_tcp(config: &CameraConfig) -> Result<Self, HandshakeError> {
        Self::connect(&config.transport(), config).await
    }

    /// Connect with the tracing observer and logging retriever.
    pub async fn connect<T: Transport>(
        transport: &T,
        config: &CameraConfig,
    ) -> Result<Self, HandshakeError> {
        Self::connect_with(
            transport,
            config,
            Arc::new(TracingObserver),
            Arc::new(LoggingRetriever),
        )
        .await
    }

    /// Open the connection, run the handshake and start event dispatch.
    ///
    /// Any handshake failure drops the connection and is returned as is.
    #[instrument(skip_all, fields(endpoint = %transport.endpoint()))]
    pub async fn connect_with<T: Transport>(
        transport: &T,
        config: &CameraConfig,
        observer: Arc<dyn SessionObserver>,
        retriever: Arc<dyn FileRetriever>,
    ) -> Result<Self, HandshakeError> {
        let (client, incoming) = PtpIpClient::connect(transport, config.client_options()).await?;
        let client = Arc::new(client);
        observer.on_event(&SessionEvent::Connected {
            endpoint: transport.endpoint(),
            device: client.device_name().to_string(),
        });

        let events = Arc::new(Mutex::new(EventState::default()));
        let (closed_tx, closed) = watch::channel(None);
        let dispatcher = tokio::spawn(dispatch_loop(
            incoming,
            EventDispatcher::new(events.clone(), observer.clone(), retriever),
            observer.clone(),
            closed_tx,
        ));

        let outcome = Handshake::new(&client, observer.as_ref())
            .with_prefetch(config.prefetch_event)
            .run()
            .await;
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                client.disconnect();
                return Err(e);
            }
        };

        let last_event = match &outcome.prefetch {
            PrefetchOutcome::Fetched(event) => Some(event.clone()),
            _ => None,
        };
        info!(
            model = %outcome.device_info.model,
            sdio = outcome.ext_info.is_some(),
            "Camera ready"
        );

        Ok(Self {
            client,
            device_info: outcome.device_info,
            ext_info: outcome.ext_info,
            prefetch: outcome.prefetch,
            last_event: Mutex::new(last_event),
            events,
            closed,
            dispatcher,
        })
    }

    /// Device info with the SDIO overlay merged.
    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    pub fn ext_info(&self) -> Option<&SdioExtDeviceInfo> {
        self.ext_info.as_ref()
    }

    /// Outcome of the event fetch run at the end of the handshake.
    pub fn prefetch(&self) -> &PrefetchOutcome {
        &self.prefetch
    }

    pub fn access(&self) -> PropertyAccess<'_> {
        PropertyAccess::new(&self.client, &self.device_info)
    }

    pub async fn get_property(&self, code: PropertyCode) -> Result<DeviceProperty, ClientError> {
        self.access().get_property(code).await
    }

    pub async fn get_all_properties(&self) -> Result<Vec<DeviceProperty>, ClientError> {
        self.access().get_all_properties().await
    }

    pub async fn set_property(
        &self,
        code: PropertyCode,
        value: &PropertyValue,
    ) -> Result<(), ClientError> {
        self.access().set_property(code, value).await
    }

    /// Poll a fresh property snapshot and keep it as the last event.
    pub async fn fetch_event(&self) -> Result<CameraEvent, ClientError> {
        let event = self.access().fetch_event().await?;
        *lock(&self.last_event) = Some(event.clone());
        Ok(event)
    }

    /// Most recent property snapshot.
    pub fn last_event(&self) -> Option<CameraEvent> {
        lock(&self.last_event).clone()
    }

    /// Most recent unsolicited event packet.
    pub fn last_event_packet(&self) -> Option<EventPacket> {
        lock(&self.events).last_packet.clone()
    }

    /// Record the camera's shooting mode; used when retrieving new objects.
    pub fn set_shooting_mode(&self, mode: ShootingMode) {
        lock(&self.events).shooting_mode = Some(mode);
    }

    pub fn shooting_mode(&self) -> ShootingMode {
        lock(&self.events).shooting_mode.unwrap_or_default()
    }

    pub fn transfer_in_progress(&self) -> bool {
        lock(&self.events).transfer_in_progress
    }

    pub fn current_transaction_id(&self) -> TransactionId {
        self.client.current_transaction_id()
    }

    pub fn client(&self) -> &PtpIpClient {
        &self.client
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// Wait until the connection goes away.
    pub async fn closed(&self) -> DisconnectReason {
        let mut closed = self.closed.clone();
        let reason = match closed.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone(),
            Err(_) => self.client.disconnect_reason(),
        };
        reason.unwrap_or(DisconnectReason::Closed)
    }

    /// Close the session and the connection.
    pub async fn disconnect(self) -> Result<(), ClientError> {
        if self.client.is_connected()
            && let Err(e) = self.client.execute(OP_CLOSE_SESSION, []).await
        {
            debug!(error = %e, "CloseSession failed");
        }
        self.client.disconnect();
        self.closed().await;
        let _ = self.dispatcher.await;
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

async fn dispatch_loop(
    mut incoming: mpsc::UnboundedReceiver<Incoming>,
    dispatcher: EventDispatcher,
    observer: Arc<dyn SessionObserver>,
    closed: watch::Sender<Option<DisconnectReason>>,
) {
    while let Some(message) = incoming.recv().await {
        match message {
            Incoming::Event(event) => {
                dispatcher.dispatch(event);
            }
            Incoming::Disconnected(reason) => {
                observer.on_event(&SessionEvent::Disconnected {
                    reason: reason.clone(),
                });
                let _ = closed.send(Some(reason));
                return;
            }
        }
    }
    warn!("Event channel closed without a disconnect notice");
    let _ = closed.send(Some(DisconnectReason::Closed));
}
