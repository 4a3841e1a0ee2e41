//! Webcam, microphone and screen share producers
//!
//! Each source has one slot. A slot is guarded by an async mutex for the
//! whole check, close, capture and produce sequence, so two concurrent
//! `enable` calls for the same source can never leave two live producers.
//! The slot's current producer sits behind a plain lock so the `*_enabled`
//! getters stay synchronous.

use crate::client::{MediaChange, MediaEngineClient, MediaEvent, Producer};
use crate::device::DeviceRegistry;
use crate::encodings::get_encodings;
use crate::engine::{CodecOptions, ProduceOptions};
use crate::settings::MediaSettings;
use crate::track::{
    take_track, CaptureConstraints, DeviceKind, MediaDevices, SharedTrack, TrackConstraints,
};
use meetrtc_core::{AppData, Emitter, EventStream, MediaKind, MediaSource, MeetRtcError, Result};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Start bitrate for every video producer, in kbps
const VIDEO_START_BITRATE: u32 = 1000;

/// Producer lifecycle events
#[derive(Debug, Clone)]
pub enum ProducerEvent {
    /// A producer for `source` is live
    Produce {
        /// Source tag
        source: MediaSource,
        /// The producer
        producer: Producer,
    },
    /// The producer for `source` is gone
    Close {
        /// Source tag
        source: MediaSource,
        /// Id of the closed producer
        producer_id: String,
    },
}

impl ProducerEvent {
    /// Source tag the event refers to
    pub fn source(&self) -> MediaSource {
        match self {
            ProducerEvent::Produce { source, .. } | ProducerEvent::Close { source, .. } => *source,
        }
    }
}

/// Options for the `update_*` operations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Capture and produce even if nothing is live
    pub start: bool,
    /// Recapture when a producer is live
    pub restart: bool,
    /// Device to capture from, falls back to the first of the right kind
    pub device_id: Option<String>,
}

impl UpdateOptions {
    /// Start producing
    pub fn start() -> Self {
        Self {
            start: true,
            ..Default::default()
        }
    }

    /// Recapture the live producer
    pub fn restart() -> Self {
        Self {
            restart: true,
            ..Default::default()
        }
    }

    /// Capture from `device_id`
    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }
}

#[derive(Default)]
struct SourceSlot {
    op: tokio::sync::Mutex<()>,
    current: Mutex<Option<Producer>>,
}

impl SourceSlot {
    fn current(&self) -> Option<Producer> {
        self.current.lock().clone()
    }

    fn set(&self, producer: Producer) {
        *self.current.lock() = Some(producer);
    }

    fn take(&self) -> Option<Producer> {
        self.current.lock().take()
    }

    fn take_if(&self, producer_id: &str) -> Option<Producer> {
        let mut current = self.current.lock();
        if current.as_ref().map(|p| p.id() == producer_id).unwrap_or(false) {
            current.take()
        } else {
            None
        }
    }
}

struct ProducerInner {
    media: Arc<MediaEngineClient>,
    devices: Arc<DeviceRegistry>,
    settings: RwLock<MediaSettings>,
    webcam: SourceSlot,
    mic: SourceSlot,
    screen: SourceSlot,
    screen_audio: SourceSlot,
    events: Emitter<ProducerEvent>,
}

/// Manages the local webcam, microphone and screen share producers
pub struct ProducerManager {
    inner: Arc<ProducerInner>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl ProducerManager {
    /// Create a manager over `media` and `devices`
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(
        media: Arc<MediaEngineClient>,
        devices: Arc<DeviceRegistry>,
        settings: MediaSettings,
    ) -> Self {
        let media_events = media.subscribe();
        let inner = Arc::new(ProducerInner {
            media,
            devices,
            settings: RwLock::new(settings),
            webcam: SourceSlot::default(),
            mic: SourceSlot::default(),
            screen: SourceSlot::default(),
            screen_audio: SourceSlot::default(),
            events: Emitter::new(),
        });

        let listener = tokio::spawn(watch_remote_closes(media_events, Arc::downgrade(&inner)));
        Self {
            inner,
            listener: Mutex::new(Some(listener)),
        }
    }

    /// Subscribe to producer events
    pub fn subscribe(&self) -> EventStream<ProducerEvent> {
        self.inner.events.subscribe()
    }

    /// Current media settings
    pub fn settings(&self) -> MediaSettings {
        self.inner.settings.read().clone()
    }

    /// Replace the media settings used by later updates
    pub fn set_settings(&self, settings: MediaSettings) {
        *self.inner.settings.write() = settings;
    }

    /// Whether a webcam producer is live
    pub fn webcam_enabled(&self) -> bool {
        self.inner.webcam.current().is_some()
    }

    /// Whether a microphone producer is live
    pub fn mic_enabled(&self) -> bool {
        self.inner.mic.current().is_some()
    }

    /// Whether a screen share producer is live
    pub fn screen_sharing_enabled(&self) -> bool {
        self.inner.screen.current().is_some()
    }

    /// Live producer for `source`
    pub fn producer(&self, source: MediaSource) -> Option<Producer> {
        self.inner.slot(source).and_then(SourceSlot::current)
    }

    /// Start the webcam
    pub async fn enable_webcam(&self) -> Result<()> {
        debug!("enableWebcam()");
        self.update_webcam(UpdateOptions::start()).await
    }

    /// Stop the webcam, no-op when it is off
    pub async fn disable_webcam(&self) {
        debug!("disableWebcam()");
        let _op = self.inner.webcam.op.lock().await;
        self.inner.close_slot(MediaSource::Webcam).await;
    }

    /// Start, restart or reconfigure the webcam
    pub async fn update_webcam(&self, options: UpdateOptions) -> Result<()> {
        let _op = self.inner.webcam.op.lock().await;
        let result = self.inner.update_webcam(&options).await;
        if let Err(e) = &result {
            error!(error = %e, "updateWebcam() failed");
        }
        result
    }

    /// Start the microphone
    pub async fn enable_mic(&self) -> Result<()> {
        debug!("enableMic()");
        self.update_mic(UpdateOptions::start()).await
    }

    /// Stop the microphone, no-op when it is off
    pub async fn disable_mic(&self) {
        debug!("disableMic()");
        let _op = self.inner.mic.op.lock().await;
        self.inner.close_slot(MediaSource::Mic).await;
    }

    /// Start, restart or reconfigure the microphone
    pub async fn update_mic(&self, options: UpdateOptions) -> Result<()> {
        let _op = self.inner.mic.op.lock().await;
        let result = self.inner.update_mic(&options).await;
        if let Err(e) = &result {
            error!(error = %e, "updateMic() failed");
        }
        result
    }

    /// Start sharing the screen
    pub async fn enable_screen_sharing(&self) -> Result<()> {
        debug!("enableScreenSharing()");
        self.update_screen_sharing(UpdateOptions::start()).await
    }

    /// Stop sharing the screen and its audio, no-op when not sharing
    pub async fn disable_screen_sharing(&self) {
        debug!("disableScreenSharing()");
        let _op = self.inner.screen.op.lock().await;
        self.inner.close_screen().await;
    }

    /// Start or reconfigure the screen share
    pub async fn update_screen_sharing(&self, options: UpdateOptions) -> Result<()> {
        let _op = self.inner.screen.op.lock().await;
        let result = self.inner.update_screen_sharing(&options).await;
        if let Err(e) = &result {
            error!(error = %e, "updateScreenSharing() failed");
        }
        result
    }
}

impl std::fmt::Debug for ProducerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerManager")
            .field("webcam", &self.webcam_enabled())
            .field("mic", &self.mic_enabled())
            .field("screen", &self.screen_sharing_enabled())
            .finish()
    }
}

impl Drop for ProducerManager {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
    }
}

impl ProducerInner {
    fn slot(&self, source: MediaSource) -> Option<&SourceSlot> {
        match source {
            MediaSource::Webcam => Some(&self.webcam),
            MediaSource::Mic => Some(&self.mic),
            MediaSource::Screen => Some(&self.screen),
            MediaSource::ScreenAudio => Some(&self.screen_audio),
            MediaSource::ExtraVideo => None,
        }
    }

    fn media_devices(&self) -> &Arc<dyn MediaDevices> {
        self.devices.media_devices()
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.media.is_ready() {
            Ok(())
        } else {
            Err(MeetRtcError::ClientNotReady)
        }
    }

    async fn refresh_devices(&self) {
        if let Err(e) = self.devices.refresh().await {
            warn!(error = %e, "Unable to refresh media devices");
        }
    }

    /// Close the live producer of `source` and announce it
    async fn close_slot(&self, source: MediaSource) {
        let Some(producer) = self.slot(source).and_then(SourceSlot::take) else {
            return;
        };
        let producer_id = producer.id();
        self.media
            .change_producer(&producer_id, MediaChange::Close, true)
            .await;
        info!(source = %source, producer_id = %producer_id, "Producer closed");
        self.events.emit(ProducerEvent::Close {
            source,
            producer_id,
        });
    }

    async fn close_screen(&self) {
        if self.screen.current().is_none() {
            return;
        }
        self.close_slot(MediaSource::Screen).await;
        self.close_slot(MediaSource::ScreenAudio).await;
    }

    fn publish(&self, source: MediaSource, producer: &Producer) {
        if let Some(slot) = self.slot(source) {
            slot.set(producer.clone());
        }
        info!(source = %source, producer_id = %producer.id(), "Producer live");
        self.events.emit(ProducerEvent::Produce {
            source,
            producer: producer.clone(),
        });
    }

    async fn update_webcam(&self, options: &UpdateOptions) -> Result<()> {
        debug!(
            start = options.start,
            restart = options.restart,
            device_id = ?options.device_id,
            "updateWebcam()"
        );

        self.ensure_ready()?;
        if !self.media.media_capabilities().can_send_webcam {
            return Err(MeetRtcError::capability("cannot produce video"));
        }
        check_device_change(options)?;

        self.refresh_devices().await;
        let device_id = self
            .devices
            .resolve_device_id(options.device_id.as_deref(), DeviceKind::VideoInput);
        if device_id.is_none() {
            warn!("No webcam devices");
        }

        let settings = self.settings.read().clone();
        let existing = self.webcam.current();

        if options.start || (options.restart && existing.is_some()) {
            self.close_slot(MediaSource::Webcam).await;

            let tracks = self
                .media_devices()
                .get_user_media(CaptureConstraints {
                    video: Some(settings.webcam_constraints(device_id)),
                    audio: None,
                })
                .await?;
            let track = single_track(tracks, MediaKind::Video, "webcam")?;
            debug!(settings = ?track.settings(), "Webcam track captured");

            let producer = self
                .produce_video(&track, MediaSource::Webcam, &settings, settings.simulcast)
                .await
                .map_err(|e| {
                    track.stop();
                    e
                })?;
            self.publish(MediaSource::Webcam, &producer);
        } else if let Some(existing) = existing {
            if let Some(track) = existing.track() {
                track
                    .apply_constraints(TrackConstraints::Video(settings.webcam_constraints(None)))
                    .await?;
            }
            self.publish(MediaSource::Webcam, &existing);
        } else {
            return Ok(());
        }

        self.refresh_devices().await;
        Ok(())
    }

    async fn update_mic(&self, options: &UpdateOptions) -> Result<()> {
        debug!(
            start = options.start,
            restart = options.restart,
            device_id = ?options.device_id,
            "updateMic()"
        );

        self.ensure_ready()?;
        if !self.media.media_capabilities().can_send_mic {
            return Err(MeetRtcError::capability("cannot produce audio"));
        }
        check_device_change(options)?;

        self.refresh_devices().await;
        let device_id = self
            .devices
            .resolve_device_id(options.device_id.as_deref(), DeviceKind::AudioInput);
        if device_id.is_none() {
            warn!("No audio devices");
        }

        let settings = self.settings.read().clone();
        let existing = self.mic.current();

        if options.start || (options.restart && existing.is_some()) {
            self.close_slot(MediaSource::Mic).await;

            let tracks = self
                .media_devices()
                .get_user_media(CaptureConstraints {
                    video: None,
                    audio: Some(settings.audio_constraints(device_id)),
                })
                .await?;
            let track = single_track(tracks, MediaKind::Audio, "mic")?;

            let producer = self
                .produce_audio(&track, MediaSource::Mic, &settings)
                .await
                .map_err(|e| {
                    track.stop();
                    e
                })?;
            self.publish(MediaSource::Mic, &producer);
        } else if let Some(existing) = existing {
            if let Some(track) = existing.track() {
                track
                    .apply_constraints(TrackConstraints::Audio(settings.audio_constraints(None)))
                    .await?;
            }
            self.publish(MediaSource::Mic, &existing);
        } else {
            return Ok(());
        }

        self.refresh_devices().await;
        Ok(())
    }

    async fn update_screen_sharing(&self, options: &UpdateOptions) -> Result<()> {
        debug!(start = options.start, "updateScreenSharing()");

        self.ensure_ready()?;
        if !self.media.media_capabilities().can_share_screen {
            return Err(MeetRtcError::capability("cannot produce screen share"));
        }

        let settings = self.settings.read().clone();

        if options.start {
            self.close_screen().await;

            let tracks = self
                .media_devices()
                .get_display_media(CaptureConstraints {
                    video: Some(settings.screen_constraints()),
                    audio: Some(settings.audio_constraints(None)),
                })
                .await?;
            let (video, rest) = take_track(tracks, MediaKind::Video);
            let (audio, rest) = take_track(rest, MediaKind::Audio);
            stop_all(&rest);
            let Some(video) = video else {
                if let Some(audio) = &audio {
                    audio.stop();
                }
                return Err(MeetRtcError::DeviceNotFound {
                    kind: "screen".to_string(),
                });
            };

            let screen = match self
                .produce_video(&video, MediaSource::Screen, &settings, settings.simulcast_sharing)
                .await
            {
                Ok(producer) => producer,
                Err(e) => {
                    video.stop();
                    if let Some(audio) = &audio {
                        audio.stop();
                    }
                    return Err(e);
                }
            };
            self.publish(MediaSource::Screen, &screen);

            if let Some(audio) = audio {
                match self
                    .produce_audio(&audio, MediaSource::ScreenAudio, &settings)
                    .await
                {
                    Ok(producer) => self.publish(MediaSource::ScreenAudio, &producer),
                    Err(e) => {
                        audio.stop();
                        self.close_screen().await;
                        return Err(e);
                    }
                }
            }
        } else if let Some(screen) = self.screen.current() {
            if let Some(track) = screen.track() {
                track
                    .apply_constraints(TrackConstraints::Video(settings.screen_constraints()))
                    .await?;
            }
            self.publish(MediaSource::Screen, &screen);

            if let Some(screen_audio) = self.screen_audio.current() {
                if let Some(track) = screen_audio.track() {
                    track
                        .apply_constraints(TrackConstraints::Audio(settings.audio_constraints(None)))
                        .await?;
                }
                self.publish(MediaSource::ScreenAudio, &screen_audio);
            }
        } else {
            return Ok(());
        }

        self.refresh_devices().await;
        Ok(())
    }

    async fn produce_video(
        &self,
        track: &SharedTrack,
        source: MediaSource,
        settings: &MediaSettings,
        simulcast: bool,
    ) -> Result<Producer> {
        let track_settings = track.settings();
        let mut app_data = source_app_data(source);
        app_data.insert("width".to_string(), json!(track_settings.width));
        app_data.insert("height".to_string(), json!(track_settings.height));

        let mut encodings = Vec::new();
        if simulcast {
            let rtp_capabilities = self
                .media
                .rtp_capabilities()
                .ok_or_else(|| MeetRtcError::capability("rtp capabilities not loaded"))?;
            encodings = get_encodings(
                &rtp_capabilities,
                &settings.simulcast_profiles,
                track_settings.width,
                track_settings.height,
                source == MediaSource::Screen,
            )?;
            let scalings = encodings
                .iter()
                .map(|e| json!(e.scale_resolution_down_by))
                .collect();
            app_data.insert("resolutionScalings".to_string(), Value::Array(scalings));
        }

        self.media
            .produce(ProduceOptions {
                track: Arc::clone(track),
                encodings,
                codec_options: CodecOptions {
                    video_google_start_bitrate: Some(VIDEO_START_BITRATE),
                    ..Default::default()
                },
                app_data,
            })
            .await
    }

    async fn produce_audio(
        &self,
        track: &SharedTrack,
        source: MediaSource,
        settings: &MediaSettings,
    ) -> Result<Producer> {
        self.media
            .produce(ProduceOptions {
                track: Arc::clone(track),
                encodings: Vec::new(),
                codec_options: CodecOptions {
                    opus_stereo: Some(settings.opus_stereo),
                    opus_dtx: Some(settings.opus_dtx),
                    opus_fec: Some(settings.opus_fec),
                    opus_ptime: Some(settings.opus_ptime),
                    opus_max_playback_rate: Some(settings.opus_max_playback_rate),
                    ..Default::default()
                },
                app_data: source_app_data(source),
            })
            .await
    }

    /// A producer closed outside this manager (server, transport, track end)
    async fn remote_close(&self, producer: &Producer) {
        let Some(source) = producer.source() else {
            return;
        };
        let producer_id = producer.id();
        let Some(slot) = self.slot(source) else {
            return;
        };
        if slot.take_if(&producer_id).is_none() {
            return;
        }

        info!(source = %source, producer_id = %producer_id, "Producer closed remotely");
        self.events.emit(ProducerEvent::Close {
            source,
            producer_id,
        });
        if source == MediaSource::Screen {
            self.close_slot(MediaSource::ScreenAudio).await;
        }
    }
}

async fn watch_remote_closes(mut media_events: EventStream<MediaEvent>, inner: Weak<ProducerInner>) {
    while let Some(event) = media_events.next().await {
        let MediaEvent::ProducerClosed(producer) = event else {
            continue;
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.remote_close(&producer).await;
    }
}

fn check_device_change(options: &UpdateOptions) -> Result<()> {
    if options.device_id.is_some() && !options.start && !options.restart {
        return Err(MeetRtcError::invalid_operation(
            "changing device requires restart",
        ));
    }
    Ok(())
}

fn source_app_data(source: MediaSource) -> AppData {
    let mut app_data = AppData::new();
    app_data.insert("source".to_string(), json!(source.as_str()));
    app_data
}

fn stop_all(tracks: &[SharedTrack]) {
    for track in tracks {
        track.stop();
    }
}

/// The one captured track of `kind`, stopping anything else
fn single_track(tracks: Vec<SharedTrack>, kind: MediaKind, what: &str) -> Result<SharedTrack> {
    let (track, rest) = take_track(tracks, kind);
    stop_all(&rest);
    track.ok_or_else(|| MeetRtcError::DeviceNotFound {
        kind: what.to_string(),
    })
}
