//! TCP transport implementation.

use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{info, instrument};

use super::traits::{Transport, TransportError};

/// PTP/IP over TCP to a fixed host/port pair.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(5),
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[instrument(level = "info", skip(self), fields(addr = %self.endpoint()))]
    async fn open(&self, channel: &'static str) -> Result<TcpStream, TransportError> {
        let addr = self.endpoint();
        let stream = tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| TransportError::Timeout {
            timeout_ms: self.connect_timeout.as_millis() as u64,
        })?
        .map_err(|e| TransportError::ConnectFailed {
            addr: addr.clone(),
            message: e.to_string(),
        })?;

        // Requests are small; do not let Nagle hold them back.
        stream.set_nodelay(true)?;
        info!(channel, "Channel connected");
        Ok(stream)
    }
}

impl Transport for TcpTransport {
    type Stream = TcpStream;

    async fn open_command(&self) -> Result<TcpStream, TransportError> {
        self.open("command").await
    }

    async fn open_event(&self) -> Result<TcpStream, TransportError> {
        self.open("event").await
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
