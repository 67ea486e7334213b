//! Handshake driver.
//!
//! Each call to `advance` performs exactly one round trip and moves the
//! context one state forward, so every transition can be exercised on its
//! own.

use thiserror::Error;
use tracing::{debug, info, warn};

use super::machine::{HandshakeContext, HandshakeState};
use crate::access::{CameraEvent, PropertyAccess};
use crate::client::{ClientError, PtpIpClient, ResponseMatch};
use crate::events::{SessionEvent, SessionObserver};
use crate::protocol::{
    DecodeError, DeviceInfo, OP_GET_DEVICE_INFO, OP_OPEN_SESSION, OP_SDIO_CONNECT,
    OP_SDIO_GET_EXT_DEVICE_INFO, OPEN_SESSION_TRANSACTION_ID, OperationRequest, ResponseCode,
    SDIO_CONNECT_PHASE_1, SDIO_CONNECT_PHASE_2, SDIO_CONNECT_PHASE_3, SDIO_EXT_DEVICE_INFO_ARG,
    SDIO_TRANSACTION_RESET, SESSION_ID, SdioExtDeviceInfo,
};
use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Command request failed: {0}")]
    CommandRequestFailed(ResponseCode),

    #[error("Failed to fetch device info: {0}")]
    FetchDeviceInfoFailed(DecodeError),

    #[error("Failed to fetch SDIO extension device info: {0}")]
    FetchSdioExtDeviceInfoFailed(DecodeError),

    #[error(transparent)]
    Client(ClientError),
}

impl From<ClientError> for HandshakeError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Protocol { code, .. } => HandshakeError::CommandRequestFailed(code),
            other => HandshakeError::Client(other),
        }
    }
}

/// Result of the best-effort event fetch after `Ready`.
#[derive(Debug, Clone)]
pub enum PrefetchOutcome {
    Fetched(CameraEvent),
    /// The fetch failed; the handshake still succeeded.
    Skipped(ClientError),
    Disabled,
}

/// What a finished handshake hands to the session.
#[derive(Debug, Clone)]
pub struct HandshakeOutcome {
    /// Standard info with the extension overlay already merged.
    pub device_info: DeviceInfo,
    pub ext_info: Option<SdioExtDeviceInfo>,
    pub prefetch: PrefetchOutcome,
}

/// Drives one connection from `TransportConnected` to `Ready`.
pub struct Handshake<'a> {
    client: &'a PtpIpClient,
    observer: &'a dyn SessionObserver,
    ctx: HandshakeContext,
    prefetch_enabled: bool,
    prefetch: Option<PrefetchOutcome>,
}

impl<'a> Handshake<'a> {
    /// Start a handshake over a client whose channels are already open.
    pub fn new(client: &'a PtpIpClient, observer: &'a dyn SessionObserver) -> Self {
        let mut handshake = Self {
            client,
            observer,
            ctx: HandshakeContext::new(),
            prefetch_enabled: true,
            prefetch: None,
        };
        handshake.goto(HandshakeState::TransportConnected);
        handshake
    }

    pub fn with_prefetch(mut self, enabled: bool) -> Self {
        self.prefetch_enabled = enabled;
        self
    }

    pub fn state(&self) -> HandshakeState {
        self.ctx.state
    }

    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.ctx.device_info.as_ref()
    }

    pub fn prefetch(&self) -> Option<&PrefetchOutcome> {
        self.prefetch.as_ref()
    }

    /// Advance until `Ready`, surfacing the first failure.
    pub async fn run(mut self) -> Result<HandshakeOutcome, HandshakeError> {
        while !self.ctx.state.is_ready() {
            if let Err(e) = self.advance().await {
                warn!(state = %self.ctx.state, error = %e, "Handshake failed");
                return Err(e);
            }
        }
        let device_info = self.ctx.device_info.take().unwrap_or_default();
        Ok(HandshakeOutcome {
            device_info,
            ext_info: self.ctx.ext_info.take(),
            prefetch: self.prefetch.take().unwrap_or(PrefetchOutcome::Disabled),
        })
    }

    /// Perform the round trip for the current state and move on.
    pub async fn advance(&mut self) -> Result<HandshakeState, HandshakeError> {
        let next = match self.ctx.state {
            HandshakeState::Disconnected => return Err(TransportError::Disconnected.into()),
            HandshakeState::TransportConnected => {
                self.open_session().await?;
                HandshakeState::SessionOpened
            }
            HandshakeState::SessionOpened => {
                self.fetch_device_info().await?;
                HandshakeState::DeviceInfoFetched
            }
            HandshakeState::DeviceInfoFetched => {
                if self.ctx.device_info.as_ref().is_some_and(DeviceInfo::supports_sdio) {
                    self.sdio_connect(SDIO_CONNECT_PHASE_1).await?;
                    HandshakeState::ExtensionStarted
                } else {
                    debug!("Device does not advertise SDIO; skipping extension");
                    self.finish().await
                }
            }
            HandshakeState::ExtensionStarted => {
                self.sdio_connect(SDIO_CONNECT_PHASE_2).await?;
                HandshakeState::ExtensionConfirmed
            }
            HandshakeState::ExtensionConfirmed => {
                self.fetch_ext_device_info().await?;
                HandshakeState::ExtensionInfoFetched
            }
            HandshakeState::ExtensionInfoFetched => {
                // The device expects the counter to restart after the info fetch.
                self.client.reset_transaction_id(SDIO_TRANSACTION_RESET);
                self.sdio_connect(SDIO_CONNECT_PHASE_3).await?;
                HandshakeState::ExtensionNegotiated
            }
            HandshakeState::ExtensionNegotiated => self.finish().await,
            HandshakeState::Ready => return Ok(HandshakeState::Ready),
        };
        self.goto(next);
        Ok(next)
    }

    async fn open_session(&self) -> Result<(), HandshakeError> {
        let request = OperationRequest::new(OP_OPEN_SESSION, [SESSION_ID], OPEN_SESSION_TRANSACTION_ID);
        let completion = self
            .client
            .transact(request, ResponseMatch::AnyResponse)
            .await?;
        let code = completion.response.code;
        if !code.is_ok() {
            return Err(HandshakeError::CommandRequestFailed(code));
        }
        Ok(())
    }

    async fn fetch_device_info(&mut self) -> Result<(), HandshakeError> {
        let completion = self.client.execute(OP_GET_DEVICE_INFO, []).await?;
        let info = completion
            .data
            .ok_or_else(|| DecodeError::MalformedPayload("missing data phase".into()))
            .and_then(|data| DeviceInfo::from_bytes(&data))
            .map_err(HandshakeError::FetchDeviceInfoFailed)?;
        info!(
            model = %info.model,
            manufacturer = %info.manufacturer,
            operations = info.supported_operations.len(),
            "Device info fetched"
        );
        self.ctx.device_info = Some(info);
        Ok(())
    }

    async fn sdio_connect(&self, phase: u32) -> Result<(), HandshakeError> {
        debug!(phase, "SDIO connect");
        self.client.execute(OP_SDIO_CONNECT, [phase, 0, 0]).await?;
        Ok(())
    }

    async fn fetch_ext_device_info(&mut self) -> Result<(), HandshakeError> {
        let completion = self
            .client
            .execute(OP_SDIO_GET_EXT_DEVICE_INFO, [SDIO_EXT_DEVICE_INFO_ARG])
            .await?;
        let ext = completion
            .data
            .ok_or_else(|| DecodeError::MalformedPayload("missing data phase".into()))
            .and_then(|data| SdioExtDeviceInfo::from_bytes(&data))
            .map_err(HandshakeError::FetchSdioExtDeviceInfoFailed)?;
        if let Some(info) = self.ctx.device_info.as_mut() {
            info.merge(&ext);
        }
        info!(
            version = ext.version,
            operations = ext.operations.len(),
            properties = ext.properties.len(),
            "SDIO extension info merged"
        );
        self.ctx.ext_info = Some(ext);
        Ok(())
    }

    /// Announce completion and run the best-effort event fetch. Never fails.
    async fn finish(&mut self) -> HandshakeState {
        self.observer.on_event(&SessionEvent::HandshakeComplete);

        let outcome = match (&self.ctx.device_info, self.prefetch_enabled) {
            (Some(info), true) => match PropertyAccess::new(self.client, info).fetch_event().await {
                Ok(event) => {
                    debug!(properties = event.len(), "Initial event fetched");
                    PrefetchOutcome::Fetched(event)
                }
                Err(e) => {
                    warn!(error = %e, "Initial event fetch skipped");
                    PrefetchOutcome::Skipped(e)
                }
            },
            _ => PrefetchOutcome::Disabled,
        };
        self.prefetch = Some(outcome);
        HandshakeState::Ready
    }

    fn goto(&mut self, next: HandshakeState) {
        let from = self.ctx.state;
        self.ctx.goto_state(next);
        self.observer
            .on_event(&SessionEvent::PhaseChanged { from, to: next });
    }
}
