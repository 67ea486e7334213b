//! Transport layer abstraction.
//!
//! A PTP/IP connection is two byte streams to the same endpoint: the command
//! channel and the event channel. `Transport` opens them, allowing different
//! implementations (TCP, in-memory mock).

use std::fmt;
use std::future::Future;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::protocol::DecodeError;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to connect to {addr}: {message}")]
    ConnectFailed { addr: String, message: String },

    #[error("Connection rejected by device: reason 0x{0:08X}")]
    InitRejected(u32),

    #[error("Unexpected {got} packet while waiting for {expected}")]
    UnexpectedPacket {
        expected: &'static str,
        got: &'static str,
    },

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Malformed packet: {0}")]
    Decode(#[from] DecodeError),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why the receive loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The device closed a channel.
    Closed,
    /// Socket read error.
    ReadFailed(String),
    /// Socket write error.
    WriteFailed(String),
    /// A length prefix could not be trusted; the stream is out of sync.
    Corrupt(String),
    /// The host asked to disconnect.
    Requested,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Closed => write!(f, "connection closed by device"),
            DisconnectReason::ReadFailed(e) => write!(f, "read failed: {}", e),
            DisconnectReason::WriteFailed(e) => write!(f, "write failed: {}", e),
            DisconnectReason::Corrupt(e) => write!(f, "corrupt stream: {}", e),
            DisconnectReason::Requested => write!(f, "disconnect requested"),
        }
    }
}

/// Abstract PTP/IP transport.
///
/// This trait enables:
/// - Production implementation over TCP
/// - Mock implementation for unit testing
pub trait Transport: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Open the command channel.
    fn open_command(&self) -> impl Future<Output = Result<Self::Stream, TransportError>> + Send;

    /// Open the event channel. Called after the command channel is initialised.
    fn open_event(&self) -> impl Future<Output = Result<Self::Stream, TransportError>> + Send;

    /// Human readable endpoint for logs.
    fn endpoint(&self) -> String;
}
