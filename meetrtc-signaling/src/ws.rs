//! JSON-over-WebSocket signaling transport
//!
//! Frames are JSON text messages tagged by `type`:
//!
//! ```text
//! {"type":"request","id":1,"method":"join","data":{..}}
//! {"type":"response","id":1,"ok":true,"data":{..}}
//! {"type":"response","id":1,"ok":false,"error":".."}
//! {"type":"notification","method":"newPeer","data":{..}}
//! ```

use crate::protocol::{SignalingNotification, SignalingRequest};
use crate::transport::{SignalingTransport, TransportEvent, IO_CLIENT_DISCONNECT, IO_SERVER_DISCONNECT};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use meetrtc_core::{MeetRtcError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tungstenite::Message;

/// Reason reported when the socket fails while reading
pub const TRANSPORT_ERROR: &str = "transport error";

/// Reason reported when the socket ends without a close handshake
pub const TRANSPORT_CLOSE: &str = "transport close";

/// Wire frame exchanged with the room server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WireFrame {
    /// Client to server request
    Request {
        /// Correlation id
        id: u64,
        /// Method name
        method: String,
        /// Payload
        #[serde(default)]
        data: Value,
    },
    /// Answer to a request
    Response {
        /// Correlation id of the request
        id: u64,
        /// Whether the request succeeded
        ok: bool,
        /// Success payload
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        /// Error payload
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<Value>,
    },
    /// Server push message
    Notification {
        /// Method name
        method: String,
        /// Payload
        #[serde(default)]
        data: Value,
    },
}

type PendingMap = DashMap<u64, (String, oneshot::Sender<Result<Value>>)>;

#[derive(Default)]
struct Shared {
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    pending: PendingMap,
    next_id: AtomicU64,
    closing: AtomicBool,
}

/// Removes a pending entry when the waiting request is dropped
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

/// Signaling transport over a single WebSocket connection
#[derive(Clone, Default)]
pub struct WebSocketTransport {
    shared: Arc<Shared>,
}

impl WebSocketTransport {
    /// Create a disconnected transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of requests waiting for an answer
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("pending", &self.shared.pending.len())
            .field("connected", &self.shared.outbound.lock().is_some())
            .finish()
    }
}

#[async_trait]
impl SignalingTransport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<mpsc::UnboundedReceiver<TransportEvent>> {
        let (ws_stream, _) = connect_async(url).await.map_err(|e| MeetRtcError::Transport {
            reason: format!("WebSocket connect to {url} failed: {e}"),
        })?;
        tracing::debug!("WebSocket connection established to {}", url);

        let (mut sink, mut stream) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        self.shared.closing.store(false, Ordering::SeqCst);
        *self.shared.outbound.lock() = Some(out_tx);
        let _ = event_tx.send(TransportEvent::Connected);

        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let is_close = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    tracing::debug!("WebSocket write failed: {}", e);
                    break;
                }
                if is_close {
                    break;
                }
            }
        });

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let reason = loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => handle_text(&shared, &event_tx, &text),
                    Some(Ok(Message::Close(_))) => break IO_SERVER_DISCONNECT,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!("WebSocket read failed: {}", e);
                        break TRANSPORT_ERROR;
                    }
                    None => break TRANSPORT_CLOSE,
                }
            };
            let reason = if shared.closing.load(Ordering::SeqCst) {
                IO_CLIENT_DISCONNECT
            } else {
                reason
            };

            shared.outbound.lock().take();
            let failed: Vec<u64> = shared.pending.iter().map(|entry| *entry.key()).collect();
            for id in failed {
                if let Some((_, (method, tx))) = shared.pending.remove(&id) {
                    tracing::debug!("Failing pending request {} ({})", id, method);
                    let _ = tx.send(Err(MeetRtcError::Transport {
                        reason: reason.to_string(),
                    }));
                }
            }
            let _ = event_tx.send(TransportEvent::Disconnected {
                reason: reason.to_string(),
            });
        });

        Ok(event_rx)
    }

    async fn request(&self, request: SignalingRequest) -> Result<Value> {
        let outbound = self
            .shared
            .outbound
            .lock()
            .clone()
            .ok_or(MeetRtcError::NotConnected)?;

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.shared
            .pending
            .insert(id, (request.method.clone(), tx));
        let _guard = PendingGuard {
            pending: &self.shared.pending,
            id,
        };

        let frame = WireFrame::Request {
            id,
            method: request.method,
            data: request.data,
        };
        let text = serde_json::to_string(&frame).map_err(|e| MeetRtcError::Transport {
            reason: format!("failed to encode request: {e}"),
        })?;
        outbound
            .send(Message::Text(text))
            .map_err(|_| MeetRtcError::NotConnected)?;

        rx.await.map_err(|_| MeetRtcError::Transport {
            reason: "response channel closed".to_string(),
        })?
    }

    async fn disconnect(&self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        let outbound = self.shared.outbound.lock().clone();
        if let Some(outbound) = outbound {
            let _ = outbound.send(Message::Close(None));
        }
    }
}

fn handle_text(shared: &Shared, events: &mpsc::UnboundedSender<TransportEvent>, text: &str) {
    let frame = match serde_json::from_str::<WireFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!("Invalid signaling frame: {}", e);
            return;
        }
    };

    match frame {
        WireFrame::Response {
            id,
            ok,
            data,
            error,
        } => {
            let Some((_, (method, tx))) = shared.pending.remove(&id) else {
                tracing::debug!("Response for unknown request {}", id);
                return;
            };
            let result = if ok {
                Ok(data.unwrap_or(Value::Null))
            } else {
                Err(MeetRtcError::Server {
                    method,
                    error: error.unwrap_or(Value::Null),
                })
            };
            let _ = tx.send(result);
        }
        WireFrame::Notification { method, data } => {
            let _ = events.send(TransportEvent::Notification(SignalingNotification::new(
                method, data,
            )));
        }
        WireFrame::Request { method, .. } => {
            tracing::debug!("Ignoring server request {}", method);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_frame_shape() {
        let frame = WireFrame::Request {
            id: 7,
            method: "join".to_string(),
            data: json!({"displayName": "Alice"}),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "request");
        assert_eq!(json["id"], 7);
        assert_eq!(json["method"], "join");
    }

    #[test]
    fn test_error_response_parsing() {
        let frame: WireFrame =
            serde_json::from_str(r#"{"type":"response","id":3,"ok":false,"error":"denied"}"#)
                .unwrap();
        assert_eq!(
            frame,
            WireFrame::Response {
                id: 3,
                ok: false,
                data: None,
                error: Some(json!("denied")),
            }
        );
    }

    #[test]
    fn test_response_routed_to_pending_request() {
        let shared = Shared::default();
        let (events, _rx) = mpsc::unbounded_channel();
        let (tx, mut rx) = oneshot::channel();
        shared.pending.insert(1, ("produce".to_string(), tx));

        handle_text(
            &shared,
            &events,
            r#"{"type":"response","id":1,"ok":false,"error":{"reason":"nope"}}"#,
        );

        match rx.try_recv().unwrap() {
            Err(MeetRtcError::Server { method, error }) => {
                assert_eq!(method, "produce");
                assert_eq!(error, json!({"reason": "nope"}));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(shared.pending.is_empty());
    }

    #[test]
    fn test_notification_forwarded() {
        let shared = Shared::default();
        let (events, mut rx) = mpsc::unbounded_channel();
        handle_text(
            &shared,
            &events,
            r#"{"type":"notification","method":"newPeer","data":{"id":"p1"}}"#,
        );
        handle_text(&shared, &events, "not json");

        match rx.try_recv().unwrap() {
            TransportEvent::Notification(n) => assert_eq!(n.method, "newPeer"),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }
}
