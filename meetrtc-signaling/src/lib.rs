//! # meetrtc signaling
//!
//! Persistent request/response channel to the SFU room server.
//!
//! [`SignalingChannel`] layers timeout and retry semantics plus an ordered
//! notification fan-out over any [`SignalingTransport`]. The crate ships a
//! JSON-over-WebSocket transport ([`WebSocketTransport`]); tests and hosts can
//! plug in their own.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod protocol;
pub mod transport;
pub mod ws;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export main types
pub use channel::{ChannelConfig, ChannelEvent, ChannelStats, SignalingChannel};
pub use protocol::{methods, SignalingNotification, SignalingRequest};
pub use transport::{SignalingTransport, TransportEvent, IO_CLIENT_DISCONNECT, IO_SERVER_DISCONNECT};
pub use ws::WebSocketTransport;
