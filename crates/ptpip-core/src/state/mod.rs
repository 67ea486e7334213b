//! Handshake state machine and event classification.

pub mod classifier;
pub mod handshake;
pub mod machine;

pub use classifier::{EventAction, EventDispatcher, EventState, classify};
pub use handshake::{Handshake, HandshakeError, HandshakeOutcome, PrefetchOutcome};
pub use machine::{HandshakeContext, HandshakeState};
