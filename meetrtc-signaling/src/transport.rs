//! Pluggable signaling transport

use crate::protocol::{SignalingNotification, SignalingRequest};
use async_trait::async_trait;
use meetrtc_core::Result;
use serde_json::Value;
use tokio::sync::mpsc;

/// Disconnect reason for a server-initiated close
pub const IO_SERVER_DISCONNECT: &str = "io server disconnect";

/// Disconnect reason for a client-initiated close
pub const IO_CLIENT_DISCONNECT: &str = "io client disconnect";

/// Lifecycle and push events raised by a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Underlying connection established
    Connected,
    /// Underlying connection lost
    Disconnected {
        /// Transport-level reason string
        reason: String,
    },
    /// Server push message
    Notification(SignalingNotification),
}

impl TransportEvent {
    /// Whether the disconnect reason means a deliberate close by either side
    pub fn is_final_disconnect(reason: &str) -> bool {
        reason == IO_SERVER_DISCONNECT || reason == IO_CLIENT_DISCONNECT
    }
}

/// Wire transport carrying signaling requests and notifications
///
/// Implementations correlate each request with exactly one answer. Timeouts
/// and retries are applied by [`crate::SignalingChannel`], not here.
#[async_trait]
pub trait SignalingTransport: Send + Sync + 'static {
    /// Open the connection and return its event feed
    async fn connect(&self, url: &str) -> Result<mpsc::UnboundedReceiver<TransportEvent>>;

    /// Send one request and wait for its answer
    ///
    /// Server-side failures surface as [`meetrtc_core::MeetRtcError::Server`].
    async fn request(&self, request: SignalingRequest) -> Result<Value>;

    /// Close the connection
    async fn disconnect(&self);
}
