//! ptpip-core: PTP/IP client engine with Sony SDIO extension support.
//!
//! This crate remote-controls a camera over PTP/IP: it frames packets,
//! correlates responses and data phases with their transactions, runs the
//! session handshake (including the vendor SDIO negotiation) and turns
//! unsolicited events into session notifications.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Wire constants, packet codec, device info and property descriptors
//! - **Registry**: Transaction ids and pending completions
//! - **Transport**: Two-channel stream abstraction (TCP, mock)
//! - **Client**: Receive loop, writer task and request/response API
//! - **Access**: Capability-driven property reads and writes
//! - **State**: Handshake state machine and event classifier
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: High-level camera object
//!
//! # Example
//!
//! ```no_run
//! use ptpip_core::session::{Camera, CameraConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = CameraConfig {
//!     host: "192.168.122.1".to_string(),
//!     ..Default::default()
//! };
//!
//! let camera = Camera::connect_tcp(&config).await?;
//! let iso = camera.get_property(0xD21E).await?;
//! println!("{:?}", iso.current);
//! camera.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod access;
pub mod client;
pub mod events;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use access::{CameraEvent, FetchStrategy, PropertyAccess};
pub use client::{ClientError, ClientOptions, Incoming, PtpIpClient, ResponseMatch};
pub use events::{
    FileRetriever, LoggingRetriever, NullObserver, SessionEvent, SessionObserver, ShootingMode,
    TracingObserver,
};
pub use protocol::{DecodeError, DeviceInfo, DeviceProperty, Packet, PropertyValue, ResponseCode};
pub use registry::{Completion, RegistryError, TransactionRegistry};
pub use session::{Camera, CameraConfig};
pub use state::{HandshakeError, HandshakeState, PrefetchOutcome};
pub use transport::{DisconnectReason, MockTransport, TcpTransport, Transport, TransportError};
