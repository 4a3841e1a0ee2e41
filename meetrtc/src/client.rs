//! Meeting client facade
//!
//! [`MeetingClient`] wires the signaling channel, the media engine client,
//! the device registry, the producer manager and the room roster together,
//! and republishes their events as one [`Event`] stream.

use crate::config::{ClientConfig, JoinOptions, JoinResponse};
use crate::event::{Event, EventFilter, FilteredEventStream};
use crate::participant::{LobbyPeer, Peer};
use crate::room::{RoomConnectionState, RoomRosterSync, RoomState};
use meetrtc_core::{Emitter, EventStream, MeetRtcError, Result};
use meetrtc_media::{
    AudioLevelMonitor, AudioLevelOptions, DeviceRegistry, MediaCapabilities, MediaDeviceInfo,
    MediaDevices, MediaEngine, MediaEngineClient, MediaSettings, PeerConsumers, ProducerManager,
    UpdateOptions,
};
use meetrtc_signaling::protocol::JoinData;
use meetrtc_signaling::{
    methods, ChannelConfig, ChannelEvent, SignalingChannel, SignalingTransport, WebSocketTransport,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[cfg(feature = "diagnostics")]
use meetrtc_diagnostics::{DebugLogger, LogConfig};

/// Fluent builder for a [`MeetingClient`]
#[derive(Default)]
pub struct MeetingClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn SignalingTransport>>,
    engine: Option<Arc<dyn MediaEngine>>,
    media_devices: Option<Arc<dyn MediaDevices>>,
    audio_levels: Option<(Arc<dyn AudioLevelMonitor>, AudioLevelOptions)>,
    #[cfg(feature = "diagnostics")]
    logging: Option<LogConfig>,
}

impl MeetingClientBuilder {
    /// Start from `config`
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the signaling server base URL (required)
    pub fn signaling_host(mut self, host: &str) -> Self {
        self.config.signaling_host = host.to_string();
        self
    }

    /// Set the local peer id (required)
    pub fn peer_id(mut self, peer_id: &str) -> Self {
        self.config.peer_id = peer_id.to_string();
        self
    }

    /// Set the request timeout and retries
    pub fn channel_config(mut self, channel: ChannelConfig) -> Self {
        self.config.channel = channel;
        self
    }

    /// Set the capture and codec settings
    pub fn media_settings(mut self, media: MediaSettings) -> Self {
        self.config.media = media;
        self
    }

    /// Use `transport` instead of the WebSocket transport
    pub fn transport(mut self, transport: Arc<dyn SignalingTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// WebRTC engine (required)
    pub fn engine(mut self, engine: Arc<dyn MediaEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Host device capability (required)
    pub fn media_devices(mut self, media_devices: Arc<dyn MediaDevices>) -> Self {
        self.media_devices = Some(media_devices);
        self
    }

    /// Report producer and consumer volumes from `monitor`
    pub fn audio_levels(mut self, monitor: Arc<dyn AudioLevelMonitor>, options: AudioLevelOptions) -> Self {
        self.audio_levels = Some((monitor, options));
        self
    }

    /// Initialise structured logging when the client is built
    #[cfg(feature = "diagnostics")]
    pub fn logging(mut self, config: LogConfig) -> Self {
        self.logging = Some(config);
        self
    }

    /// Build the client
    ///
    /// Must be called inside a Tokio runtime.
    pub fn build(self) -> Result<MeetingClient> {
        if self.config.signaling_host.is_empty() {
            return Err(MeetRtcError::MissingConfiguration {
                field: "signaling_host".to_string(),
            });
        }
        if self.config.peer_id.is_empty() {
            return Err(MeetRtcError::MissingConfiguration {
                field: "peer_id".to_string(),
            });
        }
        let engine = self.engine.ok_or_else(|| MeetRtcError::MissingConfiguration {
            field: "engine".to_string(),
        })?;
        let media_devices = self
            .media_devices
            .ok_or_else(|| MeetRtcError::MissingConfiguration {
                field: "media_devices".to_string(),
            })?;
        tokio::runtime::Handle::try_current().map_err(|e| MeetRtcError::Initialization {
            reason: format!("meeting client needs a Tokio runtime: {}", e),
        })?;

        #[cfg(feature = "diagnostics")]
        if let Some(logging) = self.logging {
            DebugLogger::init_logging(logging)?;
        }

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(WebSocketTransport::new()));
        let channel = Arc::new(SignalingChannel::new(transport, self.config.channel.clone()));

        let mut media = MediaEngineClient::new(Arc::clone(&channel), engine, Arc::clone(&media_devices));
        if let Some((monitor, options)) = self.audio_levels {
            media = media.with_audio_levels(monitor, options);
        }
        let media = Arc::new(media);
        let devices = Arc::new(DeviceRegistry::new(media_devices));
        let producers = Arc::new(ProducerManager::new(
            Arc::clone(&media),
            Arc::clone(&devices),
            self.config.media.clone(),
        ));
        let room = Arc::new(RoomRosterSync::new(&channel));

        Ok(MeetingClient::assemble(ClientParts {
            config: self.config,
            channel,
            media,
            devices,
            producers,
            room,
        }))
    }
}

impl std::fmt::Debug for MeetingClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeetingClientBuilder")
            .field("config", &self.config)
            .field("custom_transport", &self.transport.is_some())
            .field("engine", &self.engine.is_some())
            .field("media_devices", &self.media_devices.is_some())
            .finish()
    }
}

struct ClientParts {
    config: ClientConfig,
    channel: Arc<SignalingChannel>,
    media: Arc<MediaEngineClient>,
    devices: Arc<DeviceRegistry>,
    producers: Arc<ProducerManager>,
    room: Arc<RoomRosterSync>,
}

struct ClientInner {
    config: ClientConfig,
    channel: Arc<SignalingChannel>,
    media: Arc<MediaEngineClient>,
    devices: Arc<DeviceRegistry>,
    producers: Arc<ProducerManager>,
    room: Arc<RoomRosterSync>,
    room_id: Mutex<Option<String>>,
    closed: AtomicBool,
    events: Arc<Emitter<Event>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Client for one SFU room session
///
/// # Example
/// ```rust,no_run
/// use meetrtc::{JoinOptions, MeetingClient};
/// # use std::sync::Arc;
///
/// # async fn example(
/// #     engine: Arc<dyn meetrtc::MediaEngine>,
/// #     devices: Arc<dyn meetrtc::MediaDevices>,
/// # ) -> meetrtc::Result<()> {
/// let client = MeetingClient::builder()
///     .signaling_host("wss://meet.example.com:443")
///     .peer_id("alice")
///     .engine(engine)
///     .media_devices(devices)
///     .build()?;
///
/// let mut events = client.subscribe();
/// client.join("standup", JoinOptions::new("Alice").with_audio()).await?;
/// while let Some(event) = events.next().await {
///     println!("{}", event.event_type());
/// }
/// # Ok(())
/// # }
/// ```
pub struct MeetingClient {
    inner: Arc<ClientInner>,
}

impl MeetingClient {
    /// Start building a client
    pub fn builder() -> MeetingClientBuilder {
        MeetingClientBuilder::default()
    }

    fn assemble(parts: ClientParts) -> Self {
        let events = Arc::new(Emitter::new());
        let mut tasks = vec![
            forward(parts.room.subscribe(), Arc::clone(&events), Event::Room),
            forward(parts.media.subscribe(), Arc::clone(&events), Event::Media),
            forward(parts.producers.subscribe(), Arc::clone(&events), Event::Producer),
            forward(parts.devices.subscribe(), Arc::clone(&events), Event::Device),
        ];
        let channel_events = parts.channel.subscribe();

        let inner = Arc::new(ClientInner {
            config: parts.config,
            channel: parts.channel,
            media: parts.media,
            devices: parts.devices,
            producers: parts.producers,
            room: parts.room,
            room_id: Mutex::new(None),
            closed: AtomicBool::new(false),
            events,
            tasks: Mutex::new(Vec::new()),
        });
        tasks.push(tokio::spawn(watch_channel(channel_events, Arc::downgrade(&inner))));
        *inner.tasks.lock() = tasks;

        Self { inner }
    }

    /// Client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Room joined or being joined
    pub fn room_id(&self) -> Option<String> {
        self.inner.room_id.lock().clone()
    }

    /// Subscribe to every client event
    pub fn subscribe(&self) -> EventStream<Event> {
        self.inner.events.subscribe()
    }

    /// Subscribe to the events `filter` lets through
    pub fn subscribe_filtered(&self, filter: EventFilter) -> FilteredEventStream {
        FilteredEventStream::new(self.subscribe(), filter)
    }

    /// Join `room_id`
    ///
    /// Connects the signaling channel, creates the media transports, sends
    /// the `join` request and seeds the roster from its answer. Webcam and
    /// microphone failures requested through `options` are logged and do
    /// not fail the join. A client joins at most one room; on failure it
    /// must be closed.
    pub async fn join(&self, room_id: &str, options: JoinOptions) -> Result<JoinResponse> {
        if self.is_closed() {
            return Err(MeetRtcError::invalid_operation("client is closed"));
        }
        {
            let mut current = self.inner.room_id.lock();
            if let Some(current) = current.as_ref() {
                return Err(MeetRtcError::invalid_operation(format!(
                    "already joined room {}",
                    current
                )));
            }
            *current = Some(room_id.to_string());
        }

        debug!(room_id = %room_id, options = ?options, "join()");
        self.inner.room.set_connection_state(RoomConnectionState::Connecting);

        let response = match self.inner.join_room(room_id, &options).await {
            Ok(response) => response,
            Err(e) => {
                error!(room_id = %room_id, error = %e, "join() failed");
                return Err(e);
            }
        };
        info!(
            room_id = %room_id,
            authenticated = response.authenticated,
            peers = response.peers.len(),
            "Joined room"
        );

        if options.video {
            if let Err(e) = self.inner.producers.enable_webcam().await {
                warn!(error = %e, "Could not start webcam after join");
            }
        }
        if options.audio {
            if let Err(e) = self.inner.producers.enable_mic().await {
                warn!(error = %e, "Could not start microphone after join");
            }
        }
        Ok(response)
    }

    /// Leave the room and release every transport
    ///
    /// Idempotent: only the first call disconnects, closes the transports and
    /// emits [`Event::ClientClosed`].
    pub async fn close(&self) {
        self.inner.close().await;
    }

    /// Whether [`MeetingClient::close`] ran
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    // ========================================================================
    // LOCAL MEDIA
    // ========================================================================

    /// Start the webcam
    pub async fn enable_webcam(&self) -> Result<()> {
        self.inner.producers.enable_webcam().await
    }

    /// Stop the webcam
    pub async fn disable_webcam(&self) {
        self.inner.producers.disable_webcam().await
    }

    /// Restart or reconfigure the webcam
    pub async fn update_webcam(&self, options: UpdateOptions) -> Result<()> {
        self.inner.producers.update_webcam(options).await
    }

    /// Whether the webcam is producing
    pub fn webcam_enabled(&self) -> bool {
        self.inner.producers.webcam_enabled()
    }

    /// Start the microphone
    pub async fn enable_mic(&self) -> Result<()> {
        self.inner.producers.enable_mic().await
    }

    /// Stop the microphone
    pub async fn disable_mic(&self) {
        self.inner.producers.disable_mic().await
    }

    /// Restart or reconfigure the microphone
    pub async fn update_mic(&self, options: UpdateOptions) -> Result<()> {
        self.inner.producers.update_mic(options).await
    }

    /// Whether the microphone is producing
    pub fn mic_enabled(&self) -> bool {
        self.inner.producers.mic_enabled()
    }

    /// Start sharing the screen
    pub async fn enable_screen_sharing(&self) -> Result<()> {
        self.inner.producers.enable_screen_sharing().await
    }

    /// Stop sharing the screen
    pub async fn disable_screen_sharing(&self) {
        self.inner.producers.disable_screen_sharing().await
    }

    /// Whether the screen is being shared
    pub fn screen_sharing_enabled(&self) -> bool {
        self.inner.producers.screen_sharing_enabled()
    }

    /// Replace the capture and codec settings used by later updates
    pub fn set_media_settings(&self, settings: MediaSettings) {
        self.inner.producers.set_settings(settings);
    }

    /// What this client can send
    pub fn media_capabilities(&self) -> MediaCapabilities {
        self.inner.media.media_capabilities()
    }

    /// Refresh and list the host's media devices
    pub async fn available_media_devices(&self) -> Result<Vec<MediaDeviceInfo>> {
        self.inner.devices.refresh().await?;
        Ok(self.inner.devices.devices())
    }

    // ========================================================================
    // ROOM
    // ========================================================================

    /// Consumers of `peer_id` grouped by source
    pub fn consumers_by_peer(&self, peer_id: &str) -> PeerConsumers {
        self.inner.media.consumers_by_peer(peer_id)
    }

    /// Current room state
    pub fn room_state(&self) -> RoomState {
        self.inner.room.state()
    }

    /// Peers in the room
    pub fn peers(&self) -> Vec<Peer> {
        self.inner.room.peers()
    }

    /// Peers waiting in the lobby
    pub fn lobby_peers(&self) -> Vec<LobbyPeer> {
        self.inner.room.lobby_peers()
    }

    /// Peer currently speaking
    pub fn active_speaker_id(&self) -> Option<String> {
        self.inner.room.active_speaker_id()
    }

    // ========================================================================
    // COMPONENTS
    // ========================================================================

    /// Signaling channel
    pub fn channel(&self) -> &Arc<SignalingChannel> {
        &self.inner.channel
    }

    /// Media engine client
    pub fn media(&self) -> &Arc<MediaEngineClient> {
        &self.inner.media
    }

    /// Device registry
    pub fn devices(&self) -> &Arc<DeviceRegistry> {
        &self.inner.devices
    }

    /// Producer manager
    pub fn producers(&self) -> &Arc<ProducerManager> {
        &self.inner.producers
    }

    /// Room roster
    pub fn room(&self) -> &Arc<RoomRosterSync> {
        &self.inner.room
    }
}

impl std::fmt::Debug for MeetingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeetingClient")
            .field("peer_id", &self.inner.config.peer_id)
            .field("room_id", &self.room_id())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ClientInner {
    async fn join_room(&self, room_id: &str, options: &JoinOptions) -> Result<JoinResponse> {
        self.channel.connect(&self.config.signaling_url(room_id)).await?;
        self.media
            .create_transports(self.room.ice_servers(), options.force_tcp)
            .await?;

        let rtp_capabilities = self.media.rtp_capabilities().ok_or(MeetRtcError::ClientNotReady)?;
        let request = JoinData {
            display_name: options.display_name.clone(),
            picture: options.picture.clone(),
            from: options.from.clone(),
            rtp_capabilities: serde_json::to_value(&rtp_capabilities).map_err(|e| {
                MeetRtcError::InvalidMessage {
                    method: methods::JOIN.to_string(),
                    source: e,
                }
            })?,
            returning: None,
        };
        let response: JoinResponse = self.channel.request(methods::JOIN, &request).await?;

        self.room
            .init(response.peers.clone(), response.lobby_peers.clone())?;
        self.room.set_connection_state(RoomConnectionState::Connected);
        Ok(response)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("Client already closed");
            return;
        }
        info!(peer_id = %self.config.peer_id, "Closing meeting client");

        self.channel.disconnect().await;
        self.media.close();
        self.room.close();
        self.events.emit(Event::ClientClosed);
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

fn forward<E, F>(mut stream: EventStream<E>, events: Arc<Emitter<Event>>, wrap: F) -> JoinHandle<()>
where
    E: Send + 'static,
    F: Fn(E) -> Event + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = stream.next().await {
            events.emit(wrap(event));
        }
    })
}

async fn watch_channel(mut stream: EventStream<ChannelEvent>, inner: Weak<ClientInner>) {
    while let Some(event) = stream.next().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.events.emit(Event::Signaling(event.clone()));

        match event {
            ChannelEvent::Disconnected => {
                debug!("Signaling disconnected, closing client");
                inner.close().await;
            }
            ChannelEvent::Reconnect { reason } => {
                warn!(reason = %reason, "Signaling dropped, room disconnected");
                inner.room.set_connection_state(RoomConnectionState::Disconnected);
            }
            _ => {}
        }
    }
}
