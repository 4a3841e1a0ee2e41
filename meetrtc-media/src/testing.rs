//! In-memory engine, devices and audio levels for tests
//!
//! [`MockEngine`] behaves like a loaded WebRTC engine: transports negotiate
//! through their [`TransportHandler`], producers get the id the server
//! returns and closing a transport closes everything on it.
//! [`sfu_responder`] answers the SFU requests for a
//! [`meetrtc_signaling::testing::MockTransport`].

use crate::engine::{
    CodecOptions, ConsumeOptions, EngineConsumer, EngineProducer, EngineTransport, HandleEvent,
    MediaEngine, ProduceOptions, RtpCapabilities, RtpEncoding, TransportDirection,
    TransportHandler, TransportOptions,
};
use crate::track::{
    CaptureConstraints, DeviceKind, MediaDeviceInfo, MediaDevices, MediaTrack, SharedTrack,
    TrackConstraints, TrackSettings,
};
use crate::volume::{AudioLevelMonitor, AudioLevelOptions};
use async_trait::async_trait;
use meetrtc_core::{AppData, Emitter, EventStream, MediaKind, MeetRtcError, Result};
use meetrtc_signaling::methods;
use meetrtc_signaling::protocol::SignalingRequest;
use meetrtc_signaling::testing::MockReply;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Router capabilities with opus and the given video codec
pub fn router_rtp_capabilities(video_mime_type: &str) -> Value {
    json!({
        "codecs": [
            {"kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2},
            {"kind": "video", "mimeType": video_mime_type, "clockRate": 90000}
        ],
        "headerExtensions": []
    })
}

/// Responder playing the SFU side of the media requests
///
/// Transport ids are `transport-N`, producer ids `producer-N`. `join`
/// answers with an empty room; everything else with `{}`.
pub fn sfu_responder() -> impl FnMut(&SignalingRequest) -> MockReply + Send + 'static {
    sfu_responder_with_join(json!({
        "peers": [],
        "lobbyPeers": [],
        "authenticated": false,
        "roles": [],
        "tracker": "",
        "roomPermissions": {},
        "userRoles": {},
        "allowWhenRoleMissing": [],
        "chatHistory": [],
        "fileHistory": [],
        "lastNHistory": [],
        "locked": false
    }))
}

/// [`sfu_responder`] answering `join` with `join_response`
pub fn sfu_responder_with_join(
    join_response: Value,
) -> impl FnMut(&SignalingRequest) -> MockReply + Send + 'static {
    let mut transports = 0;
    let mut producers = 0;
    move |request| match request.method.as_str() {
        methods::GET_ROUTER_RTP_CAPABILITIES => MockReply::Ok(router_rtp_capabilities("video/VP8")),
        methods::CREATE_WEBRTC_TRANSPORT => {
            transports += 1;
            MockReply::Ok(json!({
                "id": format!("transport-{}", transports),
                "iceParameters": {"usernameFragment": "frag", "password": "pwd"},
                "iceCandidates": [],
                "dtlsParameters": {"role": "auto", "fingerprints": []}
            }))
        }
        methods::PRODUCE => {
            producers += 1;
            MockReply::Ok(json!({ "id": format!("producer-{}", producers) }))
        }
        methods::JOIN => MockReply::Ok(join_response.clone()),
        _ => MockReply::Ok(json!({})),
    }
}

/// Scripted local or remote track
#[derive(Debug)]
pub struct MockTrack {
    id: String,
    kind: MediaKind,
    settings: Mutex<TrackSettings>,
    stopped: AtomicBool,
    applied: Mutex<Vec<TrackConstraints>>,
}

impl MockTrack {
    /// Track with a random id and the given settings
    pub fn new(kind: MediaKind, settings: TrackSettings) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            settings: Mutex::new(settings),
            stopped: AtomicBool::new(false),
            applied: Mutex::new(Vec::new()),
        }
    }

    /// Video track of `width` x `height`
    pub fn video(width: u32, height: u32, device_id: Option<String>) -> Self {
        Self::new(
            MediaKind::Video,
            TrackSettings {
                device_id,
                width: Some(width),
                height: Some(height),
                frame_rate: Some(30),
                ..Default::default()
            },
        )
    }

    /// Mono 48 kHz audio track
    pub fn audio(device_id: Option<String>) -> Self {
        Self::new(
            MediaKind::Audio,
            TrackSettings {
                device_id,
                sample_rate: Some(48000),
                channel_count: Some(1),
                ..Default::default()
            },
        )
    }

    /// Constraints applied so far
    pub fn applied_constraints(&self) -> Vec<TrackConstraints> {
        self.applied.lock().clone()
    }
}

#[async_trait]
impl MediaTrack for MockTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn settings(&self) -> TrackSettings {
        self.settings.lock().clone()
    }

    async fn apply_constraints(&self, constraints: TrackConstraints) -> Result<()> {
        if self.is_stopped() {
            return Err(MeetRtcError::Engine {
                reason: "track stopped".to_string(),
            });
        }
        {
            let mut settings = self.settings.lock();
            match &constraints {
                TrackConstraints::Video(video) => {
                    settings.width = video.width.or(settings.width);
                    settings.height = video.height.or(settings.height);
                    settings.frame_rate = video.frame_rate.or(settings.frame_rate);
                }
                TrackConstraints::Audio(audio) => {
                    settings.sample_rate = audio.sample_rate.or(settings.sample_rate);
                    settings.channel_count = audio.channel_count.or(settings.channel_count);
                }
            }
        }
        self.applied.lock().push(constraints);
        Ok(())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

struct DevicesState {
    devices: Vec<MediaDeviceInfo>,
    fail_enumeration: bool,
    camera_size: (u32, u32),
    display_size: (u32, u32),
    display_audio: bool,
    display_supported: bool,
    capture_error: Option<String>,
    user_media_requests: Vec<CaptureConstraints>,
    display_media_requests: Vec<CaptureConstraints>,
    tracks: Vec<Arc<MockTrack>>,
}

/// Scripted host devices
#[derive(Clone)]
pub struct MockDevices {
    state: Arc<Mutex<DevicesState>>,
}

impl MockDevices {
    /// No devices, 1280x720 camera, 1920x1080 display without audio
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(DevicesState {
                devices: Vec::new(),
                fail_enumeration: false,
                camera_size: (1280, 720),
                display_size: (1920, 1080),
                display_audio: false,
                display_supported: true,
                capture_error: None,
                user_media_requests: Vec::new(),
                display_media_requests: Vec::new(),
                tracks: Vec::new(),
            })),
        }
    }

    /// One camera `cam-1`, one microphone `mic-1` and one speaker `spk-1`
    pub fn with_default_devices() -> Self {
        let devices = Self::new();
        devices.set_devices(vec![
            MediaDeviceInfo::new("cam-1", DeviceKind::VideoInput, "Camera"),
            MediaDeviceInfo::new("mic-1", DeviceKind::AudioInput, "Microphone"),
            MediaDeviceInfo::new("spk-1", DeviceKind::AudioOutput, "Speakers"),
        ]);
        devices
    }

    /// Replace the enumerated devices
    pub fn set_devices(&self, devices: Vec<MediaDeviceInfo>) {
        self.state.lock().devices = devices;
    }

    /// Make enumeration fail
    pub fn fail_enumeration(&self, fail: bool) {
        self.state.lock().fail_enumeration = fail;
    }

    /// Size of captured camera tracks
    pub fn set_camera_size(&self, width: u32, height: u32) {
        self.state.lock().camera_size = (width, height);
    }

    /// Size of captured display tracks
    pub fn set_display_size(&self, width: u32, height: u32) {
        self.state.lock().display_size = (width, height);
    }

    /// Whether display capture also yields an audio track
    pub fn set_display_audio(&self, enabled: bool) {
        self.state.lock().display_audio = enabled;
    }

    /// Whether the platform supports display capture
    pub fn set_display_supported(&self, supported: bool) {
        self.state.lock().display_supported = supported;
    }

    /// Fail the next capture with a device acquisition error
    pub fn fail_next_capture(&self, reason: &str) {
        self.state.lock().capture_error = Some(reason.to_string());
    }

    /// Constraints passed to `get_user_media`
    pub fn user_media_requests(&self) -> Vec<CaptureConstraints> {
        self.state.lock().user_media_requests.clone()
    }

    /// Constraints passed to `get_display_media`
    pub fn display_media_requests(&self) -> Vec<CaptureConstraints> {
        self.state.lock().display_media_requests.clone()
    }

    /// Every track handed out, in capture order
    pub fn issued_tracks(&self) -> Vec<Arc<MockTrack>> {
        self.state.lock().tracks.clone()
    }

    fn capture(&self, constraints: &CaptureConstraints, size: (u32, u32), with_audio: bool) -> Result<Vec<SharedTrack>> {
        let mut state = self.state.lock();
        if let Some(reason) = state.capture_error.take() {
            return Err(MeetRtcError::DeviceAcquisition { reason });
        }

        let mut tracks: Vec<Arc<MockTrack>> = Vec::new();
        if let Some(video) = &constraints.video {
            tracks.push(Arc::new(MockTrack::video(size.0, size.1, video.device_id.clone())));
        }
        if with_audio {
            if let Some(audio) = &constraints.audio {
                tracks.push(Arc::new(MockTrack::audio(audio.device_id.clone())));
            }
        }
        state.tracks.extend(tracks.iter().cloned());

        Ok(tracks
            .into_iter()
            .map(|t| t as SharedTrack)
            .collect())
    }
}

impl Default for MockDevices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaDevices for MockDevices {
    async fn enumerate_devices(&self) -> Result<Vec<MediaDeviceInfo>> {
        let state = self.state.lock();
        if state.fail_enumeration {
            return Err(MeetRtcError::DeviceAcquisition {
                reason: "enumeration failed".to_string(),
            });
        }
        Ok(state.devices.clone())
    }

    async fn get_user_media(&self, constraints: CaptureConstraints) -> Result<Vec<SharedTrack>> {
        let size = {
            let mut state = self.state.lock();
            state.user_media_requests.push(constraints.clone());
            state.camera_size
        };
        self.capture(&constraints, size, true)
    }

    async fn get_display_media(&self, constraints: CaptureConstraints) -> Result<Vec<SharedTrack>> {
        let (size, with_audio) = {
            let mut state = self.state.lock();
            state.display_media_requests.push(constraints.clone());
            (state.display_size, state.display_audio)
        };
        self.capture(&constraints, size, with_audio)
    }

    fn supports_display_capture(&self) -> bool {
        self.state.lock().display_supported
    }
}

/// Producer created by a [`MockEngineTransport`]
pub struct MockProducer {
    id: String,
    kind: MediaKind,
    track: SharedTrack,
    app_data: AppData,
    encodings: Vec<RtpEncoding>,
    codec_options: CodecOptions,
    paused: AtomicBool,
    closed: AtomicBool,
    events: Emitter<HandleEvent>,
}

impl MockProducer {
    /// Encodings given on produce
    pub fn encodings(&self) -> &[RtpEncoding] {
        &self.encodings
    }

    /// Codec options given on produce
    pub fn codec_options(&self) -> &CodecOptions {
        &self.codec_options
    }

    /// Simulate the capture source going away
    pub fn end_track(&self) {
        self.track.stop();
        self.events.emit(HandleEvent::TrackEnded);
    }

    fn transport_closed(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.track.stop();
            self.events.emit(HandleEvent::TransportClosed);
        }
    }
}

impl EngineProducer for MockProducer {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn track(&self) -> Option<SharedTrack> {
        Some(Arc::clone(&self.track))
    }

    fn app_data(&self) -> AppData {
        self.app_data.clone()
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.track.stop();
    }

    fn subscribe(&self) -> EventStream<HandleEvent> {
        self.events.subscribe()
    }
}

/// Consumer created by a [`MockEngineTransport`]
pub struct MockConsumer {
    id: String,
    producer_id: String,
    kind: MediaKind,
    track: SharedTrack,
    paused: AtomicBool,
    closed: AtomicBool,
    events: Emitter<HandleEvent>,
}

impl MockConsumer {
    fn transport_closed(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.events.emit(HandleEvent::TransportClosed);
        }
    }
}

impl EngineConsumer for MockConsumer {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn producer_id(&self) -> String {
        self.producer_id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn track(&self) -> SharedTrack {
        Arc::clone(&self.track)
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.track.stop();
    }

    fn subscribe(&self) -> EventStream<HandleEvent> {
        self.events.subscribe()
    }
}

/// Transport created by [`MockEngine`]
pub struct MockEngineTransport {
    id: String,
    direction: TransportDirection,
    options: TransportOptions,
    handler: Arc<dyn TransportHandler>,
    connected: AtomicBool,
    closed: AtomicBool,
    fail_produce: Arc<Mutex<Option<String>>>,
    producers: Mutex<Vec<Arc<MockProducer>>>,
    consumers: Mutex<Vec<Arc<MockConsumer>>>,
}

impl MockEngineTransport {
    /// Server parameters the transport was built from
    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    /// Whether the DTLS connect round trip happened
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Producers created on this transport
    pub fn producers(&self) -> Vec<Arc<MockProducer>> {
        self.producers.lock().clone()
    }

    /// Consumers created on this transport
    pub fn consumers(&self) -> Vec<Arc<MockConsumer>> {
        self.consumers.lock().clone()
    }

    async fn ensure_connected(&self) -> Result<()> {
        if self.connected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self
            .handler
            .on_connect(&self.id, json!({"role": "client", "fingerprints": []}))
            .await;
        if result.is_err() {
            self.connected.store(false, Ordering::SeqCst);
        }
        result
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(MeetRtcError::Engine {
                reason: format!("transport {} closed", self.id),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl EngineTransport for MockEngineTransport {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn direction(&self) -> TransportDirection {
        self.direction
    }

    async fn produce(&self, options: ProduceOptions) -> Result<Arc<dyn EngineProducer>> {
        self.ensure_open()?;
        let failure = self.fail_produce.lock().take();
        if let Some(reason) = failure {
            return Err(MeetRtcError::Engine { reason });
        }
        self.ensure_connected().await?;

        let kind = options.track.kind();
        let rtp_parameters = json!({
            "codecs": [],
            "encodings": serde_json::to_value(&options.encodings).unwrap_or(Value::Null)
        });
        let id = self
            .handler
            .on_produce(&self.id, kind, rtp_parameters, options.app_data.clone())
            .await?;

        let producer = Arc::new(MockProducer {
            id,
            kind,
            track: options.track,
            app_data: options.app_data,
            encodings: options.encodings,
            codec_options: options.codec_options,
            paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            events: Emitter::new(),
        });
        self.producers.lock().push(Arc::clone(&producer));
        Ok(producer)
    }

    async fn consume(&self, options: ConsumeOptions) -> Result<Arc<dyn EngineConsumer>> {
        self.ensure_open()?;
        self.ensure_connected().await?;

        let track: SharedTrack = match options.kind {
            MediaKind::Audio => Arc::new(MockTrack::audio(None)),
            MediaKind::Video => Arc::new(MockTrack::video(640, 360, None)),
        };
        let consumer = Arc::new(MockConsumer {
            id: options.id,
            producer_id: options.producer_id,
            kind: options.kind,
            track,
            paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            events: Emitter::new(),
        });
        self.consumers.lock().push(Arc::clone(&consumer));
        Ok(consumer)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for producer in self.producers.lock().iter() {
            producer.transport_closed();
        }
        for consumer in self.consumers.lock().iter() {
            consumer.transport_closed();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct EngineState {
    loaded: Option<RtpCapabilities>,
    denied: HashSet<MediaKind>,
    transports: Vec<Arc<MockEngineTransport>>,
}

/// In-memory [`MediaEngine`]
#[derive(Clone, Default)]
pub struct MockEngine {
    state: Arc<Mutex<EngineState>>,
    fail_produce: Arc<Mutex<Option<String>>>,
}

impl MockEngine {
    /// Fresh, unloaded engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse to produce media of `kind`
    pub fn deny_kind(&self, kind: MediaKind) {
        self.state.lock().denied.insert(kind);
    }

    /// Fail the next produce call on any transport
    pub fn fail_next_produce(&self, reason: &str) {
        *self.fail_produce.lock() = Some(reason.to_string());
    }

    /// Every transport created so far
    pub fn transports(&self) -> Vec<Arc<MockEngineTransport>> {
        self.state.lock().transports.clone()
    }

    /// Most recent send transport
    pub fn send_transport(&self) -> Option<Arc<MockEngineTransport>> {
        self.transport(TransportDirection::Send)
    }

    /// Most recent receive transport
    pub fn recv_transport(&self) -> Option<Arc<MockEngineTransport>> {
        self.transport(TransportDirection::Recv)
    }

    /// Producers across every transport
    pub fn producers(&self) -> Vec<Arc<MockProducer>> {
        self.transports()
            .iter()
            .flat_map(|t| t.producers())
            .collect()
    }

    /// Producer by id
    pub fn producer(&self, id: &str) -> Option<Arc<MockProducer>> {
        self.producers().into_iter().find(|p| p.id == id)
    }

    fn transport(&self, direction: TransportDirection) -> Option<Arc<MockEngineTransport>> {
        self.state
            .lock()
            .transports
            .iter()
            .rev()
            .find(|t| t.direction == direction)
            .cloned()
    }

    fn create_transport(
        &self,
        direction: TransportDirection,
        options: TransportOptions,
        handler: Arc<dyn TransportHandler>,
    ) -> Result<Arc<dyn EngineTransport>> {
        let mut state = self.state.lock();
        if state.loaded.is_none() {
            return Err(MeetRtcError::Engine {
                reason: "engine not loaded".to_string(),
            });
        }

        let transport = Arc::new(MockEngineTransport {
            id: options.id.clone(),
            direction,
            options,
            handler,
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            fail_produce: Arc::clone(&self.fail_produce),
            producers: Mutex::new(Vec::new()),
            consumers: Mutex::new(Vec::new()),
        });
        state.transports.push(Arc::clone(&transport));
        Ok(transport)
    }
}

#[async_trait]
impl MediaEngine for MockEngine {
    async fn load(&self, router_rtp_capabilities: RtpCapabilities) -> Result<()> {
        let mut state = self.state.lock();
        if state.loaded.is_some() {
            return Err(MeetRtcError::Engine {
                reason: "already loaded".to_string(),
            });
        }
        state.loaded = Some(router_rtp_capabilities);
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.state.lock().loaded.is_some()
    }

    fn rtp_capabilities(&self) -> Option<RtpCapabilities> {
        self.state.lock().loaded.clone()
    }

    fn can_produce(&self, kind: MediaKind) -> bool {
        let state = self.state.lock();
        !state.denied.contains(&kind)
            && state
                .loaded
                .as_ref()
                .map(|caps| caps.first_codec(kind).is_some())
                .unwrap_or(false)
    }

    async fn create_send_transport(
        &self,
        options: TransportOptions,
        handler: Arc<dyn TransportHandler>,
    ) -> Result<Arc<dyn EngineTransport>> {
        self.create_transport(TransportDirection::Send, options, handler)
    }

    async fn create_recv_transport(
        &self,
        options: TransportOptions,
        handler: Arc<dyn TransportHandler>,
    ) -> Result<Arc<dyn EngineTransport>> {
        self.create_transport(TransportDirection::Recv, options, handler)
    }
}

/// Audio level source fed by the test
#[derive(Clone, Default)]
pub struct MockAudioLevels {
    feeds: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<f64>>>>,
}

impl MockAudioLevels {
    /// Empty level source
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a dB sample for `track_id`, false if the track is not monitored
    pub fn push_level(&self, track_id: &str, db: f64) -> bool {
        self.feeds
            .lock()
            .get(track_id)
            .map(|tx| tx.send(db).is_ok())
            .unwrap_or(false)
    }

    /// Ids of monitored tracks
    pub fn monitored_tracks(&self) -> Vec<String> {
        self.feeds.lock().keys().cloned().collect()
    }
}

impl AudioLevelMonitor for MockAudioLevels {
    fn monitor(&self, track: SharedTrack, _options: AudioLevelOptions) -> EventStream<f64> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds.lock().insert(track.id(), tx);
        EventStream::new(rx)
    }
}
