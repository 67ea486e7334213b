//! Handshake states and the context that tracks them.

use std::fmt;

use crate::protocol::{DeviceInfo, SdioExtDeviceInfo};

/// Connection handshake state. Strictly sequential; the `Extension*`
/// states are only visited when the device advertises the SDIO extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeState {
    #[default]
    Disconnected,
    /// Both channels initialised.
    TransportConnected,
    SessionOpened,
    DeviceInfoFetched,
    /// First SDIO_Connect accepted.
    ExtensionStarted,
    /// Second SDIO_Connect accepted.
    ExtensionConfirmed,
    /// Extension info merged into the device info.
    ExtensionInfoFetched,
    /// Counter reset and third SDIO_Connect accepted.
    ExtensionNegotiated,
    Ready,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeState::Disconnected => write!(f, "DISCONNECTED"),
            HandshakeState::TransportConnected => write!(f, "TRANSPORT_CONNECTED"),
            HandshakeState::SessionOpened => write!(f, "SESSION_OPENED"),
            HandshakeState::DeviceInfoFetched => write!(f, "DEVICE_INFO_FETCHED"),
            HandshakeState::ExtensionStarted => write!(f, "EXTENSION_STARTED"),
            HandshakeState::ExtensionConfirmed => write!(f, "EXTENSION_CONFIRMED"),
            HandshakeState::ExtensionInfoFetched => write!(f, "EXTENSION_INFO_FETCHED"),
            HandshakeState::ExtensionNegotiated => write!(f, "EXTENSION_NEGOTIATED"),
            HandshakeState::Ready => write!(f, "READY"),
        }
    }
}

impl HandshakeState {
    /// Check if this state belongs to the SDIO extension path.
    pub fn is_extension(&self) -> bool {
        matches!(
            self,
            HandshakeState::ExtensionStarted
                | HandshakeState::ExtensionConfirmed
                | HandshakeState::ExtensionInfoFetched
                | HandshakeState::ExtensionNegotiated
        )
    }

    pub fn is_ready(&self) -> bool {
        *self == HandshakeState::Ready
    }
}

/// Everything the handshake has learned so far.
#[derive(Debug, Default)]
pub struct HandshakeContext {
    pub state: HandshakeState,
    /// Set once GetDeviceInfo decoded; extended by the SDIO overlay.
    pub device_info: Option<DeviceInfo>,
    pub ext_info: Option<SdioExtDeviceInfo>,
}

impl HandshakeContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transition to a new state.
    pub fn goto_state(&mut self, new_state: HandshakeState) {
        tracing::info!(from = %self.state, to = %new_state, "State transition");
        self.state = new_state;
    }
}
