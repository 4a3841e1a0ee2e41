//! Media engine client
//!
//! Bridges the signaling channel and the external media engine. The client
//! owns the send and receive transports and every producer and consumer
//! built on them. Server notifications about consumers and producers are
//! drained from one subscription, one message at a time, and turned into
//! typed [`MediaEvent`]s.
//!
//! Producers and consumers reach the closed state through a single path
//! ([`MediaEngineClient::change_producer`] / [`MediaEngineClient::change_consumer`])
//! whether the close was asked for locally, pushed by the server, or caused
//! by the transport or track going away.

use crate::engine::{
    ConsumeOptions, EngineConsumer, EngineProducer, EngineTransport, HandleEvent, IceServer,
    MediaEngine, ProduceOptions, RtpCapabilities, TransportDirection, TransportHandler,
    TransportOptions,
};
use crate::track::{MediaDevices, SharedTrack};
use crate::volume::{AudioLevelMonitor, AudioLevelOptions, Volume, VolumeWatcher};
use async_trait::async_trait;
use meetrtc_core::{AppData, Emitter, EventStream, MediaKind, MediaSource, MeetRtcError, Result};
use meetrtc_signaling::protocol::{
    ConnectWebRtcTransport, ConsumerData, CreateWebRtcTransport, NewConsumerData, ProduceData,
    ProduceResponse, ProducerData, WebRtcTransportInfo,
};
use meetrtc_signaling::{methods, ChannelEvent, SignalingChannel, SignalingNotification};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// State change applied to a producer or consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaChange {
    /// Stop sending or playing
    Pause,
    /// Start sending or playing again
    Resume,
    /// Terminal close
    Close,
}

impl MediaChange {
    /// Verb used in request method names
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaChange::Pause => "pause",
            MediaChange::Resume => "resume",
            MediaChange::Close => "close",
        }
    }

    /// Change carried by a consumer or producer notification
    pub fn from_notification(method: &str) -> Option<Self> {
        match method {
            methods::CONSUMER_PAUSED | methods::PRODUCER_PAUSED => Some(MediaChange::Pause),
            methods::CONSUMER_RESUMED | methods::PRODUCER_RESUMED => Some(MediaChange::Resume),
            methods::CONSUMER_CLOSED | methods::PRODUCER_CLOSED => Some(MediaChange::Close),
            _ => None,
        }
    }
}

impl fmt::Display for MediaChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the loaded engine and platform can send
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaCapabilities {
    /// Microphone audio can be produced
    pub can_send_mic: bool,
    /// Webcam video can be produced
    pub can_send_webcam: bool,
    /// Screen capture is available and video can be produced
    pub can_share_screen: bool,
}

/// Outbound media stream
#[derive(Clone)]
pub struct Producer {
    handle: Arc<dyn EngineProducer>,
    source: Option<MediaSource>,
}

impl Producer {
    fn new(handle: Arc<dyn EngineProducer>) -> Self {
        let source = MediaSource::from_app_data(&handle.app_data());
        Self { handle, source }
    }

    /// Producer id
    pub fn id(&self) -> String {
        self.handle.id()
    }

    /// Media kind
    pub fn kind(&self) -> MediaKind {
        self.handle.kind()
    }

    /// Source tag from the application data
    pub fn source(&self) -> Option<MediaSource> {
        self.source
    }

    /// Track being sent
    pub fn track(&self) -> Option<SharedTrack> {
        self.handle.track()
    }

    /// Application data
    pub fn app_data(&self) -> AppData {
        self.handle.app_data()
    }

    /// Whether sending is paused
    pub fn is_paused(&self) -> bool {
        self.handle.is_paused()
    }

    /// Whether the producer is closed
    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("source", &self.source)
            .field("paused", &self.is_paused())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Inbound media stream from a remote peer
#[derive(Clone)]
pub struct Consumer {
    handle: Arc<dyn EngineConsumer>,
    peer_id: String,
    source: Option<MediaSource>,
    app_data: AppData,
}

impl Consumer {
    /// Consumer id
    pub fn id(&self) -> String {
        self.handle.id()
    }

    /// Remote producer id
    pub fn producer_id(&self) -> String {
        self.handle.producer_id()
    }

    /// Owning remote peer
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Media kind
    pub fn kind(&self) -> MediaKind {
        self.handle.kind()
    }

    /// Source tag of the remote producer
    pub fn source(&self) -> Option<MediaSource> {
        self.source
    }

    /// Received track
    pub fn track(&self) -> SharedTrack {
        self.handle.track()
    }

    /// Application data of the remote producer, plus `peerId`
    pub fn app_data(&self) -> &AppData {
        &self.app_data
    }

    /// Whether playback is paused
    pub fn is_paused(&self) -> bool {
        self.handle.is_paused()
    }

    /// Whether the consumer is closed
    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("id", &self.id())
            .field("peer_id", &self.peer_id)
            .field("source", &self.source)
            .field("paused", &self.is_paused())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Consumers of one remote peer grouped by source
#[derive(Debug, Clone, Default)]
pub struct PeerConsumers {
    /// Microphone
    pub mic: Option<Consumer>,
    /// Webcam
    pub webcam: Option<Consumer>,
    /// Screen share
    pub screen: Option<Consumer>,
    /// Additional video sources
    pub extra_video: Vec<Consumer>,
}

/// Media events
#[derive(Debug, Clone)]
pub enum MediaEvent {
    /// A remote stream is now consumed
    ConsumerCreated {
        /// New consumer
        consumer: Consumer,
        /// Whether the remote producer was paused server-side at creation
        producer_paused: bool,
    },
    /// Consumer paused by the server
    ConsumerPaused(Consumer),
    /// Consumer resumed by the server
    ConsumerResumed(Consumer),
    /// Consumer closed by the server or its transport
    ConsumerClosed(Consumer),
    /// Producer paused by the server
    ProducerPaused(Producer),
    /// Producer resumed by the server
    ProducerResumed(Producer),
    /// Producer closed by the server, its transport, or its track ending
    ProducerClosed(Producer),
    /// Smoothed audio level of a producer or consumer
    VolumeChanged {
        /// Producer or consumer id
        id: String,
        /// Reading
        volume: Volume,
    },
}

#[derive(Default)]
struct Transports {
    send: Option<Arc<dyn EngineTransport>>,
    recv: Option<Arc<dyn EngineTransport>>,
}

struct AudioLevels {
    monitor: Arc<dyn AudioLevelMonitor>,
    options: AudioLevelOptions,
}

struct MediaInner {
    channel: Arc<SignalingChannel>,
    engine: Arc<dyn MediaEngine>,
    media_devices: Arc<dyn MediaDevices>,
    audio_levels: RwLock<Option<AudioLevels>>,
    transports_requested: AtomicBool,
    transports: RwLock<Transports>,
    producers: RwLock<HashMap<String, Producer>>,
    consumers: RwLock<HashMap<String, Consumer>>,
    tracks: RwLock<HashMap<String, SharedTrack>>,
    volume_watchers: Mutex<HashMap<String, VolumeWatcher>>,
    producer_watchers: Mutex<HashMap<String, JoinHandle<()>>>,
    consumer_watchers: Mutex<HashMap<String, JoinHandle<()>>>,
    events: Emitter<MediaEvent>,
}

/// Client-side view of the media engine for one room session
pub struct MediaEngineClient {
    inner: Arc<MediaInner>,
    notifications: Mutex<Option<JoinHandle<()>>>,
}

impl MediaEngineClient {
    /// Create a client and start handling media notifications from `channel`
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(
        channel: Arc<SignalingChannel>,
        engine: Arc<dyn MediaEngine>,
        media_devices: Arc<dyn MediaDevices>,
    ) -> Self {
        let subscription = channel.subscribe();
        let inner = Arc::new(MediaInner {
            channel,
            engine,
            media_devices,
            audio_levels: RwLock::new(None),
            transports_requested: AtomicBool::new(false),
            transports: RwLock::new(Transports::default()),
            producers: RwLock::new(HashMap::new()),
            consumers: RwLock::new(HashMap::new()),
            tracks: RwLock::new(HashMap::new()),
            volume_watchers: Mutex::new(HashMap::new()),
            producer_watchers: Mutex::new(HashMap::new()),
            consumer_watchers: Mutex::new(HashMap::new()),
            events: Emitter::new(),
        });

        let task = tokio::spawn(drain_notifications(subscription, Arc::downgrade(&inner)));
        Self {
            inner,
            notifications: Mutex::new(Some(task)),
        }
    }

    /// Attach an audio level source for volume events
    pub fn with_audio_levels(
        self,
        monitor: Arc<dyn AudioLevelMonitor>,
        options: AudioLevelOptions,
    ) -> Self {
        *self.inner.audio_levels.write() = Some(AudioLevels { monitor, options });
        self
    }

    /// Subscribe to media events
    pub fn subscribe(&self) -> EventStream<MediaEvent> {
        self.inner.events.subscribe()
    }

    /// Signaling channel used by this client
    pub fn channel(&self) -> &Arc<SignalingChannel> {
        &self.inner.channel
    }

    /// Whether transports exist and producers can be created
    pub fn is_ready(&self) -> bool {
        self.inner.transports.read().send.is_some()
    }

    /// Load the router capabilities and create the send and receive transports
    pub async fn create_transports(&self, ice_servers: Vec<IceServer>, force_tcp: bool) -> Result<()> {
        if self.inner.transports_requested.swap(true, Ordering::SeqCst) {
            return Err(MeetRtcError::invalid_operation("transports already created"));
        }

        match self.build_transports(&ice_servers, force_tcp).await {
            Ok(transports) => {
                *self.inner.transports.write() = transports;
                info!("Media transports created");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to create media transports");
                self.inner.transports_requested.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn build_transports(&self, ice_servers: &[IceServer], force_tcp: bool) -> Result<Transports> {
        let router_rtp_capabilities: RtpCapabilities = self
            .inner
            .channel
            .request(methods::GET_ROUTER_RTP_CAPABILITIES, &json!({}))
            .await?;
        self.inner.engine.load(router_rtp_capabilities).await?;

        let handler: Arc<dyn TransportHandler> = Arc::new(SignalingTransportHandler {
            channel: Arc::clone(&self.inner.channel),
        });
        let send = self
            .create_transport(TransportDirection::Send, ice_servers, force_tcp, Arc::clone(&handler))
            .await?;
        let recv = match self
            .create_transport(TransportDirection::Recv, ice_servers, force_tcp, handler)
            .await
        {
            Ok(recv) => recv,
            Err(e) => {
                send.close();
                return Err(e);
            }
        };

        Ok(Transports {
            send: Some(send),
            recv: Some(recv),
        })
    }

    async fn create_transport(
        &self,
        direction: TransportDirection,
        ice_servers: &[IceServer],
        force_tcp: bool,
        handler: Arc<dyn TransportHandler>,
    ) -> Result<Arc<dyn EngineTransport>> {
        let request = CreateWebRtcTransport {
            force_tcp,
            producing: direction == TransportDirection::Send,
            consuming: direction == TransportDirection::Recv,
        };
        let info: WebRtcTransportInfo = self
            .inner
            .channel
            .request(methods::CREATE_WEBRTC_TRANSPORT, &request)
            .await?;
        debug!(transport_id = %info.id, direction = ?direction, "Creating media transport");

        let options = TransportOptions {
            id: info.id,
            ice_parameters: info.ice_parameters,
            ice_candidates: info.ice_candidates,
            dtls_parameters: info.dtls_parameters,
            ice_servers: ice_servers.to_vec(),
        };
        match direction {
            TransportDirection::Send => self.inner.engine.create_send_transport(options, handler).await,
            TransportDirection::Recv => self.inner.engine.create_recv_transport(options, handler).await,
        }
    }

    /// Local RTP capabilities of the loaded engine
    pub fn rtp_capabilities(&self) -> Option<RtpCapabilities> {
        self.inner.engine.rtp_capabilities()
    }

    /// What can currently be sent
    pub fn media_capabilities(&self) -> MediaCapabilities {
        let engine = &self.inner.engine;
        let can_send_webcam = engine.can_produce(MediaKind::Video);
        MediaCapabilities {
            can_send_mic: engine.can_produce(MediaKind::Audio),
            can_send_webcam,
            can_share_screen: can_send_webcam && self.inner.media_devices.supports_display_capture(),
        }
    }

    /// Send a local track
    pub async fn produce(&self, options: ProduceOptions) -> Result<Producer> {
        debug!(app_data = ?options.app_data, "produce()");

        let send = self
            .inner
            .transports
            .read()
            .send
            .clone()
            .ok_or(MeetRtcError::ClientNotReady)?;

        let track = Arc::clone(&options.track);
        let handle = send.produce(options).await?;
        let producer = Producer::new(handle);
        let producer_id = producer.id();

        self.add_track(Arc::clone(&track));
        if producer.kind() == MediaKind::Audio {
            self.inner.watch_volume(&producer_id, track);
        }
        self.inner
            .producers
            .write()
            .insert(producer_id.clone(), producer.clone());
        self.inner.watch_producer(&producer);

        info!(producer_id = %producer_id, source = ?producer.source(), "Producer created");
        Ok(producer)
    }

    /// Pause, resume or close a consumer
    ///
    /// With `local` the matching request is sent to the server first; its
    /// failure is logged and the local change still happens. Without `local`
    /// the change came from the server and an event is emitted instead.
    pub async fn change_consumer(&self, consumer_id: &str, change: MediaChange, local: bool) {
        self.inner.change_consumer(consumer_id, change, local).await
    }

    /// Pause, resume or close a producer, same rules as [`MediaEngineClient::change_consumer`]
    pub async fn change_producer(&self, producer_id: &str, change: MediaChange, local: bool) {
        self.inner.change_producer(producer_id, change, local).await
    }

    /// Producer by id
    pub fn get_producer(&self, producer_id: &str) -> Option<Producer> {
        self.inner.producers.read().get(producer_id).cloned()
    }

    /// All live producers
    pub fn get_producers(&self) -> Vec<Producer> {
        self.inner.producers.read().values().cloned().collect()
    }

    /// Live producer with the given source tag
    pub fn find_producer_by_source(&self, source: MediaSource) -> Option<Producer> {
        self.inner
            .producers
            .read()
            .values()
            .find(|p| p.source() == Some(source))
            .cloned()
    }

    /// Consumer by id
    pub fn get_consumer(&self, consumer_id: &str) -> Option<Consumer> {
        self.inner.consumers.read().get(consumer_id).cloned()
    }

    /// All live consumers
    pub fn get_consumers(&self) -> Vec<Consumer> {
        self.inner.consumers.read().values().cloned().collect()
    }

    /// Consumers of `peer_id` grouped by source
    pub fn consumers_by_peer(&self, peer_id: &str) -> PeerConsumers {
        let consumers = self.inner.consumers.read();
        let mut grouped = PeerConsumers::default();
        for consumer in consumers.values().filter(|c| c.peer_id == peer_id) {
            match consumer.source() {
                Some(MediaSource::Mic) => grouped.mic = Some(consumer.clone()),
                Some(MediaSource::Webcam) => grouped.webcam = Some(consumer.clone()),
                Some(MediaSource::Screen) => grouped.screen = Some(consumer.clone()),
                Some(MediaSource::ExtraVideo) => grouped.extra_video.push(consumer.clone()),
                _ => {}
            }
        }
        grouped
    }

    /// Register a track by id
    pub fn add_track(&self, track: SharedTrack) {
        debug!(track_id = %track.id(), "addTrack()");
        self.inner.tracks.write().insert(track.id(), track);
    }

    /// Registered track by id
    pub fn get_track(&self, track_id: &str) -> Option<SharedTrack> {
        self.inner
            .tracks
            .read()
            .get(track_id)
            .filter(|t| !t.is_stopped())
            .cloned()
    }

    /// Forget a track
    pub fn remove_track(&self, track_id: &str) -> Option<SharedTrack> {
        debug!(track_id = %track_id, "removeTrack()");
        self.inner.tracks.write().remove(track_id)
    }

    /// Close both transports
    ///
    /// The engine closes every producer and consumer on them; each one then
    /// goes through the regular close path.
    pub fn close(&self) {
        if let Some(task) = self.notifications.lock().take() {
            task.abort();
        }

        let transports = std::mem::take(&mut *self.inner.transports.write());
        if let Some(send) = transports.send {
            send.close();
        }
        if let Some(recv) = transports.recv {
            recv.close();
        }
        self.inner.volume_watchers.lock().clear();
        info!("Media client closed");
    }
}

impl fmt::Debug for MediaEngineClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaEngineClient")
            .field("ready", &self.is_ready())
            .field("producers", &self.inner.producers.read().len())
            .field("consumers", &self.inner.consumers.read().len())
            .finish()
    }
}

impl Drop for MediaEngineClient {
    fn drop(&mut self) {
        if let Some(task) = self.notifications.lock().take() {
            task.abort();
        }
    }
}

impl MediaInner {
    async fn handle_notification(self: &Arc<Self>, notification: &SignalingNotification) -> Result<()> {
        match notification.method.as_str() {
            methods::NEW_CONSUMER => {
                let data: NewConsumerData = notification.payload()?;
                self.new_consumer(data).await
            }
            methods::CONSUMER_PAUSED | methods::CONSUMER_RESUMED | methods::CONSUMER_CLOSED => {
                let data: ConsumerData = notification.payload()?;
                if let Some(change) = MediaChange::from_notification(&notification.method) {
                    self.change_consumer(&data.consumer_id, change, false).await;
                }
                Ok(())
            }
            methods::PRODUCER_PAUSED | methods::PRODUCER_RESUMED | methods::PRODUCER_CLOSED => {
                let data: ProducerData = notification.payload()?;
                if let Some(change) = MediaChange::from_notification(&notification.method) {
                    self.change_producer(&data.producer_id, change, false).await;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn new_consumer(self: &Arc<Self>, data: NewConsumerData) -> Result<()> {
        let recv = self.transports.read().recv.clone().ok_or_else(|| {
            MeetRtcError::invalid_operation("consumer can not be created without a receive transport")
        })?;

        let mut app_data = data.app_data;
        app_data.insert("peerId".to_string(), Value::String(data.peer_id.clone()));

        let handle = recv
            .consume(ConsumeOptions {
                id: data.id,
                producer_id: data.producer_id,
                kind: data.kind,
                rtp_parameters: data.rtp_parameters,
                app_data: app_data.clone(),
            })
            .await?;

        let consumer = Consumer {
            source: MediaSource::from_app_data(&app_data),
            handle: Arc::clone(&handle),
            peer_id: data.peer_id,
            app_data,
        };
        let consumer_id = consumer.id();

        if data.kind == MediaKind::Audio {
            if let Err(e) = self
                .channel
                .send_request(methods::RESUME_CONSUMER, json!({ "consumerId": consumer_id }))
                .await
            {
                warn!(consumer_id = %consumer_id, error = %e, "Unable to resume consumer server-side");
            }
            self.watch_volume(&consumer_id, handle.track());
        } else {
            handle.pause();
        }

        self.consumers
            .write()
            .insert(consumer_id.clone(), consumer.clone());
        self.watch_consumer(&consumer);

        debug!(consumer_id = %consumer_id, peer_id = %consumer.peer_id, kind = %data.kind, "Consumer created");
        self.events.emit(MediaEvent::ConsumerCreated {
            consumer,
            producer_paused: data.producer_paused,
        });
        Ok(())
    }

    async fn change_consumer(&self, consumer_id: &str, change: MediaChange, local: bool) {
        debug!(consumer_id = %consumer_id, change = %change, local, "Changing consumer");

        let consumer = self.consumers.read().get(consumer_id).cloned();
        let Some(consumer) = consumer else {
            debug!(consumer_id = %consumer_id, change = %change, "Unknown consumer");
            return;
        };

        if local {
            let method = format!("{}Consumer", change.as_str());
            if let Err(e) = self
                .channel
                .send_request(&method, json!({ "consumerId": consumer_id }))
                .await
            {
                warn!(consumer_id = %consumer_id, error = %e, "Unable to {} consumer server-side", change);
            }
        }

        match change {
            MediaChange::Pause => consumer.handle.pause(),
            MediaChange::Resume => consumer.handle.resume(),
            MediaChange::Close => {
                consumer.handle.close();
                self.consumers.write().remove(consumer_id);
                self.volume_watchers.lock().remove(consumer_id);
                if let Some(task) = self.consumer_watchers.lock().remove(consumer_id) {
                    task.abort();
                }
            }
        }

        if !local {
            self.events.emit(match change {
                MediaChange::Pause => MediaEvent::ConsumerPaused(consumer),
                MediaChange::Resume => MediaEvent::ConsumerResumed(consumer),
                MediaChange::Close => MediaEvent::ConsumerClosed(consumer),
            });
        }
    }

    async fn change_producer(&self, producer_id: &str, change: MediaChange, local: bool) {
        debug!(producer_id = %producer_id, change = %change, local, "Changing producer");

        let producer = self.producers.read().get(producer_id).cloned();
        let Some(producer) = producer else {
            debug!(producer_id = %producer_id, change = %change, "Unknown producer");
            return;
        };

        if local {
            let method = format!("{}Producer", change.as_str());
            if let Err(e) = self
                .channel
                .send_request(&method, json!({ "producerId": producer_id }))
                .await
            {
                warn!(producer_id = %producer_id, error = %e, "Unable to {} producer server-side", change);
            }
        }

        match change {
            MediaChange::Pause => producer.handle.pause(),
            MediaChange::Resume => producer.handle.resume(),
            MediaChange::Close => {
                producer.handle.close();
                self.producers.write().remove(producer_id);
                self.volume_watchers.lock().remove(producer_id);
                if let Some(task) = self.producer_watchers.lock().remove(producer_id) {
                    task.abort();
                }
                if let Some(track) = producer.track() {
                    self.tracks.write().remove(&track.id());
                }
            }
        }

        if !local {
            self.events.emit(match change {
                MediaChange::Pause => MediaEvent::ProducerPaused(producer),
                MediaChange::Resume => MediaEvent::ProducerResumed(producer),
                MediaChange::Close => MediaEvent::ProducerClosed(producer),
            });
        }
    }

    fn watch_volume(self: &Arc<Self>, id: &str, track: SharedTrack) {
        let levels = self.audio_levels.read();
        let Some(levels) = levels.as_ref() else {
            return;
        };

        let samples = levels.monitor.monitor(track, levels.options);
        let weak = Arc::downgrade(self);
        let owner = id.to_string();
        let watcher = VolumeWatcher::spawn(samples, move |volume| {
            if let Some(inner) = weak.upgrade() {
                inner.events.emit(MediaEvent::VolumeChanged {
                    id: owner.clone(),
                    volume,
                });
            }
        });
        self.volume_watchers.lock().insert(id.to_string(), watcher);
    }

    /// Close the producer on its first handle event
    ///
    /// The task is aborted when the producer is closed through
    /// [`MediaInner::change_producer`] first.
    fn watch_producer(self: &Arc<Self>, producer: &Producer) {
        let mut events = producer.handle.subscribe();
        let weak = Arc::downgrade(self);
        let producer_id = producer.id();
        let source = producer.source();
        let key = producer_id.clone();
        let task = tokio::spawn(async move {
            let Some(event) = events.next().await else {
                return;
            };
            debug!(producer_id = %producer_id, event = ?event, "Producer handle event");
            let Some(inner) = weak.upgrade() else {
                return;
            };
            // Detach so the close below does not abort this task
            inner.producer_watchers.lock().remove(&producer_id);

            // A screen share stopped from the OS is a local stop the server must hear about
            if event == HandleEvent::TrackEnded && source == Some(MediaSource::Screen) {
                inner.notify_producer_closed(&producer_id).await;
            }
            inner.change_producer(&producer_id, MediaChange::Close, false).await;
        });
        self.producer_watchers.lock().insert(key, task);
    }

    fn watch_consumer(self: &Arc<Self>, consumer: &Consumer) {
        let mut events = consumer.handle.subscribe();
        let weak = Arc::downgrade(self);
        let consumer_id = consumer.id();
        let key = consumer_id.clone();
        let task = tokio::spawn(async move {
            let Some(event) = events.next().await else {
                return;
            };
            debug!(consumer_id = %consumer_id, event = ?event, "Consumer handle event");
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.consumer_watchers.lock().remove(&consumer_id);
            inner.change_consumer(&consumer_id, MediaChange::Close, false).await;
        });
        self.consumer_watchers.lock().insert(key, task);
    }

    async fn notify_producer_closed(&self, producer_id: &str) {
        if let Err(e) = self
            .channel
            .send_request(methods::CLOSE_PRODUCER, json!({ "producerId": producer_id }))
            .await
        {
            warn!(producer_id = %producer_id, error = %e, "Unable to close producer server-side");
        }
    }
}

async fn drain_notifications(mut subscription: EventStream<ChannelEvent>, inner: Weak<MediaInner>) {
    while let Some(event) = subscription.next().await {
        let ChannelEvent::Notification(notification) = event else {
            continue;
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if let Err(e) = inner.handle_notification(&notification).await {
            error!(method = %notification.method, error = %e, "Error handling media notification");
        }
    }
}

/// Negotiation callbacks answered over the signaling channel
struct SignalingTransportHandler {
    channel: Arc<SignalingChannel>,
}

#[async_trait]
impl TransportHandler for SignalingTransportHandler {
    async fn on_connect(&self, transport_id: &str, dtls_parameters: Value) -> Result<()> {
        let request = ConnectWebRtcTransport {
            transport_id: transport_id.to_string(),
            dtls_parameters,
        };
        let _: Value = self
            .channel
            .request(methods::CONNECT_WEBRTC_TRANSPORT, &request)
            .await?;
        Ok(())
    }

    async fn on_produce(
        &self,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: Value,
        app_data: AppData,
    ) -> Result<String> {
        let request = ProduceData {
            transport_id: transport_id.to_string(),
            kind,
            rtp_parameters,
            app_data,
        };
        let response: ProduceResponse = self.channel.request(methods::PRODUCE, &request).await?;
        Ok(response.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sfu_responder, MockAudioLevels, MockDevices, MockEngine, MockTrack};
    use meetrtc_signaling::testing::{MockReply, MockTransport};
    use meetrtc_signaling::ChannelConfig;
    use std::time::Duration;

    struct Harness {
        transport: MockTransport,
        engine: MockEngine,
        devices: MockDevices,
        client: MediaEngineClient,
    }

    async fn harness() -> Harness {
        let transport = MockTransport::with_responder(sfu_responder());
        let channel = Arc::new(SignalingChannel::new(
            Arc::new(transport.clone()),
            ChannelConfig::default(),
        ));
        channel.connect("wss://sfu.test/?peerId=me&roomId=room").await.unwrap();

        let engine = MockEngine::new();
        let devices = MockDevices::with_default_devices();
        let client = MediaEngineClient::new(
            channel,
            Arc::new(engine.clone()),
            Arc::new(devices.clone()),
        );
        Harness {
            transport,
            engine,
            devices,
            client,
        }
    }

    async fn next_event(events: &mut EventStream<MediaEvent>) -> MediaEvent {
        tokio::time::timeout(Duration::from_secs(2), events.next())
            .await
            .expect("timed out waiting for media event")
            .expect("media event stream ended")
    }

    fn source_data(source: MediaSource) -> AppData {
        let mut app_data = AppData::new();
        app_data.insert("source".to_string(), json!(source.as_str()));
        app_data
    }

    fn new_consumer(id: &str, peer_id: &str, kind: &str, source: &str) -> Value {
        json!({
            "peerId": peer_id,
            "producerId": format!("remote-{}", id),
            "id": id,
            "kind": kind,
            "rtpParameters": {},
            "type": "simple",
            "appData": {"source": source},
            "producerPaused": false
        })
    }

    fn produce_options(track: SharedTrack, source: MediaSource) -> ProduceOptions {
        ProduceOptions {
            track,
            encodings: Vec::new(),
            codec_options: Default::default(),
            app_data: source_data(source),
        }
    }

    // ========================================================================
    // Transports
    // ========================================================================

    #[tokio::test]
    async fn test_create_transports() {
        let h = harness().await;
        assert!(!h.client.is_ready());

        h.client.create_transports(Vec::new(), false).await.unwrap();
        assert!(h.client.is_ready());

        let requests = h.transport.requests();
        let sent: Vec<&str> = requests.iter().map(|r| r.method.as_str()).collect();
        assert_eq!(
            sent,
            vec![
                methods::GET_ROUTER_RTP_CAPABILITIES,
                methods::CREATE_WEBRTC_TRANSPORT,
                methods::CREATE_WEBRTC_TRANSPORT
            ]
        );
        assert_eq!(requests[1].data["producing"], true);
        assert_eq!(requests[2].data["consuming"], true);
        assert_eq!(requests[2].data["forceTcp"], false);

        assert_eq!(h.engine.send_transport().unwrap().id(), "transport-1");
        assert_eq!(h.engine.recv_transport().unwrap().id(), "transport-2");
        assert!(h.client.rtp_capabilities().is_some());
    }

    #[tokio::test]
    async fn test_create_transports_twice() {
        let h = harness().await;
        h.client.create_transports(Vec::new(), false).await.unwrap();

        let err = h.client.create_transports(Vec::new(), false).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_OPERATION");
        assert_eq!(h.engine.transports().len(), 2);
    }

    #[tokio::test]
    async fn test_create_transports_failure_propagates() {
        let h = harness().await;
        h.transport
            .set_responder(|_| MockReply::ServerError(json!("router gone")));

        let err = h.client.create_transports(Vec::new(), false).await.unwrap_err();
        assert_eq!(err.error_code(), "SERVER_ERROR");
        assert!(!h.client.is_ready());
    }

    #[tokio::test]
    async fn test_media_capabilities() {
        let h = harness().await;
        assert_eq!(h.client.media_capabilities(), MediaCapabilities::default());

        h.client.create_transports(Vec::new(), false).await.unwrap();
        let caps = h.client.media_capabilities();
        assert!(caps.can_send_mic && caps.can_send_webcam && caps.can_share_screen);

        h.devices.set_display_supported(false);
        assert!(!h.client.media_capabilities().can_share_screen);

        h.engine.deny_kind(MediaKind::Video);
        let caps = h.client.media_capabilities();
        assert!(caps.can_send_mic);
        assert!(!caps.can_send_webcam);
    }

    // ========================================================================
    // Producers
    // ========================================================================

    #[tokio::test]
    async fn test_produce_requires_transports() {
        let h = harness().await;
        let track: SharedTrack = Arc::new(MockTrack::audio(None));

        let err = h
            .client
            .produce(produce_options(track, MediaSource::Mic))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "CLIENT_NOT_READY");
    }

    #[tokio::test]
    async fn test_produce_negotiates_once() {
        let h = harness().await;
        h.client.create_transports(Vec::new(), false).await.unwrap();

        let mic: SharedTrack = Arc::new(MockTrack::audio(Some("mic-1".to_string())));
        let producer = h
            .client
            .produce(produce_options(Arc::clone(&mic), MediaSource::Mic))
            .await
            .unwrap();
        assert_eq!(producer.id(), "producer-1");
        assert_eq!(producer.source(), Some(MediaSource::Mic));
        assert!(h.client.get_track(&mic.id()).is_some());

        let webcam: SharedTrack = Arc::new(MockTrack::video(1280, 720, None));
        h.client
            .produce(produce_options(webcam, MediaSource::Webcam))
            .await
            .unwrap();

        assert_eq!(h.transport.request_count(methods::CONNECT_WEBRTC_TRANSPORT), 1);
        assert_eq!(h.transport.request_count(methods::PRODUCE), 2);
        let produce = h
            .transport
            .requests()
            .into_iter()
            .find(|r| r.method == methods::PRODUCE)
            .unwrap();
        assert_eq!(produce.data["transportId"], "transport-1");
        assert_eq!(produce.data["appData"]["source"], "mic");

        assert_eq!(
            h.client
                .find_producer_by_source(MediaSource::Webcam)
                .map(|p| p.id()),
            Some("producer-2".to_string())
        );
        assert_eq!(h.client.get_producers().len(), 2);
    }

    #[tokio::test]
    async fn test_remote_producer_close() {
        let h = harness().await;
        h.client.create_transports(Vec::new(), false).await.unwrap();
        let track: SharedTrack = Arc::new(MockTrack::video(640, 360, None));
        h.client
            .produce(produce_options(Arc::clone(&track), MediaSource::Webcam))
            .await
            .unwrap();
        let mut events = h.client.subscribe();

        h.transport
            .push_notification(methods::PRODUCER_PAUSED, json!({"producerId": "producer-1"}));
        match next_event(&mut events).await {
            MediaEvent::ProducerPaused(producer) => assert!(producer.is_paused()),
            other => panic!("unexpected event {:?}", other),
        }

        h.transport
            .push_notification(methods::PRODUCER_CLOSED, json!({"producerId": "producer-1"}));
        match next_event(&mut events).await {
            MediaEvent::ProducerClosed(producer) => assert_eq!(producer.id(), "producer-1"),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(h.client.get_producer("producer-1").is_none());
        assert!(track.is_stopped());
        assert!(h.client.get_track(&track.id()).is_none());
    }

    #[tokio::test]
    async fn test_track_end_closes_producer() {
        let h = harness().await;
        h.client.create_transports(Vec::new(), false).await.unwrap();
        let track: SharedTrack = Arc::new(MockTrack::video(640, 360, None));
        h.client
            .produce(produce_options(track, MediaSource::Webcam))
            .await
            .unwrap();
        let mut events = h.client.subscribe();

        h.engine.producer("producer-1").unwrap().end_track();

        match next_event(&mut events).await {
            MediaEvent::ProducerClosed(producer) => assert!(producer.is_closed()),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(h.client.get_producers().is_empty());
        assert_eq!(h.transport.request_count(methods::CLOSE_PRODUCER), 0);
    }

    #[tokio::test]
    async fn test_screen_track_end_closes_server_side() {
        let h = harness().await;
        h.client.create_transports(Vec::new(), false).await.unwrap();
        let track: SharedTrack = Arc::new(MockTrack::video(1920, 1080, None));
        h.client
            .produce(produce_options(track, MediaSource::Screen))
            .await
            .unwrap();
        let mut events = h.client.subscribe();

        h.engine.producer("producer-1").unwrap().end_track();

        match next_event(&mut events).await {
            MediaEvent::ProducerClosed(producer) => assert_eq!(producer.id(), "producer-1"),
            other => panic!("unexpected event {:?}", other),
        }
        let close = h
            .transport
            .requests()
            .into_iter()
            .find(|r| r.method == methods::CLOSE_PRODUCER)
            .unwrap();
        assert_eq!(close.data["producerId"], "producer-1");
    }

    #[tokio::test]
    async fn test_local_close_stops_handle_watchers() {
        let h = harness().await;
        h.client.create_transports(Vec::new(), false).await.unwrap();
        for _ in 0..3 {
            let track: SharedTrack = Arc::new(MockTrack::video(640, 360, None));
            let producer = h
                .client
                .produce(produce_options(track, MediaSource::Webcam))
                .await
                .unwrap();
            assert_eq!(h.client.inner.producer_watchers.lock().len(), 1);
            h.client
                .change_producer(&producer.id(), MediaChange::Close, true)
                .await;
        }
        assert!(h.client.inner.producer_watchers.lock().is_empty());
    }

    #[tokio::test]
    async fn test_local_producer_change_is_silent() {
        let h = harness().await;
        h.client.create_transports(Vec::new(), false).await.unwrap();
        let track: SharedTrack = Arc::new(MockTrack::audio(None));
        h.client
            .produce(produce_options(track, MediaSource::Mic))
            .await
            .unwrap();
        let mut events = h.client.subscribe();

        h.client
            .change_producer("producer-1", MediaChange::Pause, true)
            .await;
        assert!(h.client.get_producer("producer-1").unwrap().is_paused());
        assert_eq!(h.transport.request_count("pauseProducer"), 1);

        h.client
            .change_producer("producer-1", MediaChange::Close, true)
            .await;
        assert!(h.client.get_producer("producer-1").is_none());
        assert_eq!(h.transport.request_count("closeProducer"), 1);
        assert!(events.drain().is_empty());
    }

    // ========================================================================
    // Consumers
    // ========================================================================

    #[tokio::test]
    async fn test_new_consumers() {
        let h = harness().await;
        h.client.create_transports(Vec::new(), false).await.unwrap();
        let mut events = h.client.subscribe();

        h.transport
            .push_notification(methods::NEW_CONSUMER, new_consumer("c-audio", "p1", "audio", "mic"));
        let audio = match next_event(&mut events).await {
            MediaEvent::ConsumerCreated {
                consumer,
                producer_paused,
            } => {
                assert!(!producer_paused);
                consumer
            }
            other => panic!("unexpected event {:?}", other),
        };
        assert!(!audio.is_paused());
        assert_eq!(audio.app_data()["peerId"], "p1");
        assert_eq!(audio.producer_id(), "remote-c-audio");
        assert_eq!(h.transport.request_count(methods::RESUME_CONSUMER), 1);

        h.transport.push_notification(
            methods::NEW_CONSUMER,
            new_consumer("c-video", "p1", "video", "webcam"),
        );
        match next_event(&mut events).await {
            MediaEvent::ConsumerCreated { consumer, .. } => assert!(consumer.is_paused()),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(h.transport.request_count(methods::RESUME_CONSUMER), 1);

        let grouped = h.client.consumers_by_peer("p1");
        assert_eq!(grouped.mic.map(|c| c.id()), Some("c-audio".to_string()));
        assert_eq!(grouped.webcam.map(|c| c.id()), Some("c-video".to_string()));
        assert!(grouped.screen.is_none());
        assert!(h.client.consumers_by_peer("p2").mic.is_none());
    }

    #[tokio::test]
    async fn test_unknown_consumer_change_keeps_stream() {
        let h = harness().await;
        h.client.create_transports(Vec::new(), false).await.unwrap();
        let mut events = h.client.subscribe();

        h.transport
            .push_notification(methods::CONSUMER_PAUSED, json!({"consumerId": "ghost"}));
        h.transport
            .push_notification(methods::NEW_CONSUMER, new_consumer("c1", "p1", "audio", "mic"));
        h.transport
            .push_notification(methods::CONSUMER_PAUSED, json!({"consumerId": "c1"}));

        assert!(matches!(
            next_event(&mut events).await,
            MediaEvent::ConsumerCreated { .. }
        ));
        match next_event(&mut events).await {
            MediaEvent::ConsumerPaused(consumer) => {
                assert_eq!(consumer.id(), "c1");
                assert!(consumer.is_paused());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_new_consumer_without_transport_is_skipped() {
        let h = harness().await;
        let mut events = h.client.subscribe();

        h.transport
            .push_notification(methods::NEW_CONSUMER, new_consumer("early", "p1", "video", "webcam"));
        h.transport
            .push_notification(methods::NEW_CONSUMER, json!({"peerId": "p1"}));
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.client.create_transports(Vec::new(), false).await.unwrap();
        h.transport
            .push_notification(methods::NEW_CONSUMER, new_consumer("late", "p1", "video", "webcam"));

        match next_event(&mut events).await {
            MediaEvent::ConsumerCreated { consumer, .. } => assert_eq!(consumer.id(), "late"),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(h.client.get_consumer("early").is_none());
    }

    #[tokio::test]
    async fn test_local_consumer_change_survives_server_error() {
        let h = harness().await;
        h.client.create_transports(Vec::new(), false).await.unwrap();
        let mut events = h.client.subscribe();
        h.transport
            .push_notification(methods::NEW_CONSUMER, new_consumer("c1", "p1", "audio", "mic"));
        next_event(&mut events).await;

        h.transport
            .set_responder(|_| MockReply::ServerError(json!("no such consumer")));
        h.client.change_consumer("c1", MediaChange::Pause, true).await;

        assert!(h.client.get_consumer("c1").unwrap().is_paused());
        assert_eq!(h.transport.request_count("pauseConsumer"), 1);
        assert!(events.drain().is_empty());
    }

    #[tokio::test]
    async fn test_remote_consumer_close() {
        let h = harness().await;
        h.client.create_transports(Vec::new(), false).await.unwrap();
        let mut events = h.client.subscribe();
        h.transport
            .push_notification(methods::NEW_CONSUMER, new_consumer("c1", "p1", "video", "screen"));
        next_event(&mut events).await;

        h.transport
            .push_notification(methods::CONSUMER_CLOSED, json!({"consumerId": "c1"}));
        match next_event(&mut events).await {
            MediaEvent::ConsumerClosed(consumer) => {
                assert!(consumer.is_closed());
                assert_eq!(consumer.source(), Some(MediaSource::Screen));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(h.client.get_consumers().is_empty());
    }

    // ========================================================================
    // Shutdown and volume
    // ========================================================================

    #[tokio::test]
    async fn test_close_cascades_to_handles() {
        let h = harness().await;
        h.client.create_transports(Vec::new(), false).await.unwrap();
        let track: SharedTrack = Arc::new(MockTrack::audio(None));
        h.client
            .produce(produce_options(track, MediaSource::Mic))
            .await
            .unwrap();
        let mut events = h.client.subscribe();
        h.transport
            .push_notification(methods::NEW_CONSUMER, new_consumer("c1", "p1", "audio", "mic"));
        next_event(&mut events).await;

        h.client.close();

        let mut producer_closed = false;
        let mut consumer_closed = false;
        for _ in 0..2 {
            match next_event(&mut events).await {
                MediaEvent::ProducerClosed(_) => producer_closed = true,
                MediaEvent::ConsumerClosed(_) => consumer_closed = true,
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert!(producer_closed && consumer_closed);
        assert!(!h.client.is_ready());
        assert!(h.client.get_producers().is_empty());
        assert!(h.client.get_consumers().is_empty());
        assert!(h.engine.transports().iter().all(|t| t.is_closed()));
    }

    #[tokio::test]
    async fn test_volume_events() {
        let h = harness().await;
        let levels = MockAudioLevels::new();
        let client = h
            .client
            .with_audio_levels(Arc::new(levels.clone()), AudioLevelOptions::default());
        client.create_transports(Vec::new(), false).await.unwrap();
        let mut events = client.subscribe();

        let track: SharedTrack = Arc::new(MockTrack::audio(None));
        client
            .produce(produce_options(Arc::clone(&track), MediaSource::Mic))
            .await
            .unwrap();
        assert!(levels.push_level(&track.id(), -30.2));

        match next_event(&mut events).await {
            MediaEvent::VolumeChanged { id, volume } => {
                assert_eq!(id, "producer-1");
                assert_eq!(volume.volume, -30);
                assert_eq!(volume.scaled_volume, 5);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
