//! Scripted signaling transport for tests
//!
//! [`MockTransport`] records every request and answers it through a
//! responder closure. Notifications and connection drops are injected by the
//! test.

use crate::protocol::{SignalingNotification, SignalingRequest};
use crate::transport::{SignalingTransport, TransportEvent, IO_CLIENT_DISCONNECT};
use async_trait::async_trait;
use meetrtc_core::{MeetRtcError, Result};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// How the mock answers one request
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Successful response payload
    Ok(Value),
    /// Server-side application error
    ServerError(Value),
    /// Never answer, so the caller's timeout fires
    Hang,
    /// Transport-level failure
    TransportError(String),
}

type Responder = Box<dyn FnMut(&SignalingRequest) -> MockReply + Send>;

/// In-memory [`SignalingTransport`]
#[derive(Clone)]
pub struct MockTransport {
    responder: Arc<Mutex<Responder>>,
    requests: Arc<Mutex<Vec<SignalingRequest>>>,
    events: Arc<Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>>,
    disconnects: Arc<AtomicUsize>,
    connect_urls: Arc<Mutex<Vec<String>>>,
}

impl MockTransport {
    /// Transport answering every request with `{method, data}`
    pub fn echo() -> Self {
        Self::with_responder(|request| {
            MockReply::Ok(json!({"method": request.method, "data": request.data}))
        })
    }

    /// Transport answering through `responder`
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&SignalingRequest) -> MockReply + Send + 'static,
    {
        Self {
            responder: Arc::new(Mutex::new(Box::new(responder))),
            requests: Arc::new(Mutex::new(Vec::new())),
            events: Arc::new(Mutex::new(None)),
            disconnects: Arc::new(AtomicUsize::new(0)),
            connect_urls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Replace the responder
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&SignalingRequest) -> MockReply + Send + 'static,
    {
        *self.responder.lock() = Box::new(responder);
    }

    /// Every request seen so far, including retries
    pub fn requests(&self) -> Vec<SignalingRequest> {
        self.requests.lock().clone()
    }

    /// Number of wire sends for `method`
    pub fn request_count(&self, method: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == method)
            .count()
    }

    /// URLs passed to `connect`
    pub fn connect_urls(&self) -> Vec<String> {
        self.connect_urls.lock().clone()
    }

    /// Number of `disconnect` calls
    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Push a server notification
    pub fn push_notification(&self, method: &str, data: Value) {
        self.send_event(TransportEvent::Notification(SignalingNotification::new(
            method, data,
        )));
    }

    /// Simulate the connection going away with `reason`
    pub fn drop_connection(&self, reason: &str) {
        self.send_event(TransportEvent::Disconnected {
            reason: reason.to_string(),
        });
    }

    fn send_event(&self, event: TransportEvent) {
        if let Some(tx) = self.events.lock().as_ref() {
            let _ = tx.send(event);
        }
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("requests", &self.requests.lock().len())
            .finish()
    }
}

#[async_trait]
impl SignalingTransport for MockTransport {
    async fn connect(&self, url: &str) -> Result<mpsc::UnboundedReceiver<TransportEvent>> {
        self.connect_urls.lock().push(url.to_string());
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(TransportEvent::Connected);
        *self.events.lock() = Some(tx);
        Ok(rx)
    }

    async fn request(&self, request: SignalingRequest) -> Result<Value> {
        self.requests.lock().push(request.clone());
        let reply = {
            let mut responder = self.responder.lock();
            (&mut *responder)(&request)
        };
        match reply {
            MockReply::Ok(value) => Ok(value),
            MockReply::ServerError(error) => Err(MeetRtcError::Server {
                method: request.method,
                error,
            }),
            MockReply::Hang => futures::future::pending().await,
            MockReply::TransportError(reason) => Err(MeetRtcError::Transport { reason }),
        }
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.drop_connection(IO_CLIENT_DISCONNECT);
    }
}
