//! Event system for UI decoupling.
//!
//! Consumers (CLI, camera-function layer) subscribe to session events
//! without reaching into the protocol engine.

use std::fmt;

use crate::protocol::ObjectHandle;
use crate::state::HandshakeState;
use crate::transport::DisconnectReason;

/// Capture mode the camera was last known to be in.
///
/// Decides how a newly added object is retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ShootingMode {
    #[default]
    Photo,
    Continuous,
    Timelapse,
    Video,
}

impl fmt::Display for ShootingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShootingMode::Photo => write!(f, "photo"),
            ShootingMode::Continuous => write!(f, "continuous"),
            ShootingMode::Timelapse => write!(f, "timelapse"),
            ShootingMode::Video => write!(f, "video"),
        }
    }
}

/// Events emitted by a camera session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Handshake moved to a new state.
    PhaseChanged {
        from: HandshakeState,
        to: HandshakeState,
    },
    /// Both channels are up.
    Connected { endpoint: String, device: String },
    /// The handshake reached `Ready`.
    HandshakeComplete,
    /// A property changed on the device; re-poll with `fetch_event`.
    EventAvailable,
    /// A new object exists on the device and retrieval was requested.
    ObjectAdded {
        handle: ObjectHandle,
        mode: ShootingMode,
    },
    /// The in-flight transfer sequence finished.
    TransferComplete,
    /// The connection went away. Emitted once.
    Disconnected { reason: DisconnectReason },
}

/// Observer trait for receiving session events.
///
/// Called from the session's dispatcher task; implementations must not
/// block.
pub trait SessionObserver: Send + Sync {
    fn on_event(&self, event: &SessionEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl SessionObserver for NullObserver {
    fn on_event(&self, _event: &SessionEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl SessionObserver for TracingObserver {
    fn on_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::PhaseChanged { from, to } => {
                tracing::debug!(from = %from, to = %to, "Phase changed");
            }
            SessionEvent::Connected { endpoint, device } => {
                tracing::info!(endpoint = %endpoint, device = %device, "Camera connected");
            }
            SessionEvent::HandshakeComplete => {
                tracing::info!("Handshake complete");
            }
            SessionEvent::EventAvailable => {
                tracing::debug!("Camera event available");
            }
            SessionEvent::ObjectAdded { handle, mode } => {
                tracing::info!(handle = %format!("0x{:08X}", handle), mode = %mode, "Object added");
            }
            SessionEvent::TransferComplete => {
                tracing::info!("Transfer complete");
            }
            SessionEvent::Disconnected { reason } => {
                tracing::warn!(reason = %reason, "Camera disconnected");
            }
        }
    }
}

/// Collaborator that fetches an object's payload once the device reports it.
///
/// Called from the dispatcher task; long transfers should be spawned.
pub trait FileRetriever: Send + Sync {
    fn retrieve(&self, handle: ObjectHandle, mode: ShootingMode);
}

/// Retriever that only logs the request.
pub struct LoggingRetriever;

impl FileRetriever for LoggingRetriever {
    fn retrieve(&self, handle: ObjectHandle, mode: ShootingMode) {
        tracing::info!(handle = %format!("0x{:08X}", handle), mode = %mode, "Retrieval requested");
    }
}
