//! Transport layer module.

pub mod mock;
pub mod tcp;
pub mod traits;

pub use mock::{MockReply, MockTransport, RecordedRequest};
pub use tcp::TcpTransport;
pub use traits::{DisconnectReason, Transport, TransportError};
