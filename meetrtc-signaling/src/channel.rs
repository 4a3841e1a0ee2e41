//! Signaling channel with timeout and retry semantics
//!
//! [`SignalingChannel`] owns one [`SignalingTransport`] connection. Requests
//! are bounded by a per-attempt timeout and retried only when that timeout
//! fires; server errors and transport errors go straight back to the caller.
//! Inbound notifications are republished, in arrival order, on a single
//! [`ChannelEvent`] stream.

use crate::protocol::{decode, SignalingNotification, SignalingRequest};
use crate::transport::{SignalingTransport, TransportEvent};
use meetrtc_core::{Emitter, EventStream, MeetRtcError, Result};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Channel-level events
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Underlying connection established
    Connected,
    /// Connection closed on purpose by either side
    Disconnected,
    /// Connection dropped unexpectedly
    Reconnect {
        /// Transport-level reason
        reason: String,
    },
    /// Server push message
    Notification(SignalingNotification),
}

/// Request timeout and retry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelConfig {
    /// Per-attempt timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Total number of attempts for a timed-out request
    pub request_retries: u32,
}

impl ChannelConfig {
    /// Per-attempt timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Set the per-attempt timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the attempt count
    pub fn with_request_retries(mut self, retries: u32) -> Self {
        self.request_retries = retries;
        self
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 20_000,
            request_retries: 3,
        }
    }
}

/// Snapshot of channel counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Logical requests issued through [`SignalingChannel::send_request`]
    pub requests: u64,
    /// Wire sends, including retries
    pub attempts: u64,
    /// Attempts that hit the timeout
    pub timeouts: u64,
    /// Requests rejected by the server
    pub server_errors: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    requests: AtomicU64,
    attempts: AtomicU64,
    timeouts: AtomicU64,
    server_errors: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> ChannelStats {
        ChannelStats {
            requests: self.requests.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            server_errors: self.server_errors.load(Ordering::Relaxed),
        }
    }
}

/// Persistent request/response channel to the room server
pub struct SignalingChannel {
    transport: Arc<dyn SignalingTransport>,
    config: ChannelConfig,
    connected: Arc<AtomicBool>,
    events: Arc<Emitter<ChannelEvent>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    stats: StatsCounters,
}

impl SignalingChannel {
    /// Create a channel over the given transport
    pub fn new(transport: Arc<dyn SignalingTransport>, config: ChannelConfig) -> Self {
        Self {
            transport,
            config,
            connected: Arc::new(AtomicBool::new(false)),
            events: Arc::new(Emitter::new()),
            pump: Mutex::new(None),
            stats: StatsCounters::default(),
        }
    }

    /// Channel configuration
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Open the underlying connection
    pub async fn connect(&self, url: &str) -> Result<()> {
        if self.is_connected() {
            return Err(MeetRtcError::invalid_operation("signaling channel already connected"));
        }

        info!(url = %url, "Connecting signaling channel");
        let feed = self.transport.connect(url).await?;
        self.connected.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(pump_events(
            feed,
            Arc::clone(&self.connected),
            Arc::clone(&self.events),
        ));
        if let Some(previous) = self.pump.lock().replace(handle) {
            if !previous.is_finished() {
                debug!("Previous signaling pump still draining");
            }
        }
        Ok(())
    }

    /// Close the underlying connection
    pub async fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            debug!("Signaling channel already disconnected");
            return;
        }
        info!("Disconnecting signaling channel");
        self.transport.disconnect().await;
    }

    /// Whether the underlying connection is up
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Subscribe to channel events
    pub fn subscribe(&self) -> EventStream<ChannelEvent> {
        self.events.subscribe()
    }

    /// Counter snapshot
    pub fn stats(&self) -> ChannelStats {
        self.stats.snapshot()
    }

    /// Send one request and wait for its answer
    ///
    /// Only timeouts are retried, up to `request_retries` attempts in total.
    /// Every retry is a fresh wire send, so `method` must be safe to repeat.
    pub async fn send_request(&self, method: &str, data: Value) -> Result<Value> {
        let attempts = self.config.request_retries.max(1);
        let timeout = self.config.request_timeout();
        self.stats.requests.fetch_add(1, Ordering::Relaxed);

        for attempt in 1..=attempts {
            if !self.is_connected() {
                return Err(MeetRtcError::NotConnected);
            }

            debug!(method = %method, attempt, "Sending signaling request");
            self.stats.attempts.fetch_add(1, Ordering::Relaxed);
            let request = SignalingRequest::new(method, data.clone());

            match tokio::time::timeout(timeout, self.transport.request(request)).await {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(e)) if e.is_timeout() => {
                    self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                    warn!(method = %method, attempt, "Signaling request timed out in transport");
                }
                Ok(Err(e)) => {
                    if matches!(e, MeetRtcError::Server { .. }) {
                        self.stats.server_errors.fetch_add(1, Ordering::Relaxed);
                    }
                    debug!(method = %method, error = %e, "Signaling request failed");
                    return Err(e);
                }
                Err(_) => {
                    self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                    warn!(method = %method, attempt, attempts, "Signaling request timed out");
                }
            }
        }

        Err(MeetRtcError::Timeout {
            method: method.to_string(),
            attempts,
            timeout,
        })
    }

    /// Send a typed request and decode the typed response
    pub async fn request<T, D>(&self, method: &str, data: &D) -> Result<T>
    where
        T: DeserializeOwned,
        D: Serialize + ?Sized,
    {
        let data = serde_json::to_value(data).map_err(|e| MeetRtcError::InvalidMessage {
            method: method.to_string(),
            source: e,
        })?;
        let response = self.send_request(method, data).await?;
        decode(method, &response)
    }
}

impl std::fmt::Debug for SignalingChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingChannel")
            .field("config", &self.config)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
    }
}

async fn pump_events(
    mut feed: mpsc::UnboundedReceiver<TransportEvent>,
    connected: Arc<AtomicBool>,
    events: Arc<Emitter<ChannelEvent>>,
) {
    while let Some(event) = feed.recv().await {
        match event {
            TransportEvent::Connected => {
                connected.store(true, Ordering::SeqCst);
                events.emit(ChannelEvent::Connected);
            }
            TransportEvent::Disconnected { reason } => {
                connected.store(false, Ordering::SeqCst);
                if TransportEvent::is_final_disconnect(&reason) {
                    info!(reason = %reason, "Signaling channel disconnected");
                    events.emit(ChannelEvent::Disconnected);
                } else {
                    warn!(reason = %reason, "Signaling channel dropped");
                    events.emit(ChannelEvent::Reconnect { reason });
                }
            }
            TransportEvent::Notification(notification) => {
                debug!(method = %notification.method, "Signaling notification");
                events.emit(ChannelEvent::Notification(notification));
            }
        }
    }
    debug!("Signaling transport feed closed");
}
