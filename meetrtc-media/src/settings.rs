//! Capture, simulcast and Opus settings for local media

use crate::track::{AudioConstraints, VideoConstraints};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named capture resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoResolution {
    /// 320 px wide
    Low,
    /// 640 px wide
    Medium,
    /// 1280 px wide
    High,
    /// 1920 px wide
    VeryHigh,
    /// 3840 px wide
    Ultra,
}

impl VideoResolution {
    /// Ideal capture width in pixels
    pub fn width(&self) -> u32 {
        match self {
            VideoResolution::Low => 320,
            VideoResolution::Medium => 640,
            VideoResolution::High => 1280,
            VideoResolution::VeryHigh => 1920,
            VideoResolution::Ultra => 3840,
        }
    }

    /// Ideal capture height for the given aspect ratio
    pub fn height(&self, aspect_ratio: f64) -> u32 {
        if aspect_ratio <= 0.0 {
            return self.width();
        }
        (self.width() as f64 / aspect_ratio).round() as u32
    }
}

/// One simulcast layer of a profile
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulcastProfile {
    /// Downscale factor relative to the capture size
    pub scale_resolution_down_by: f64,
    /// Bitrate ceiling in bits per second
    pub max_bit_rate: u64,
}

impl SimulcastProfile {
    /// Create a layer
    pub const fn new(scale_resolution_down_by: f64, max_bit_rate: u64) -> Self {
        Self {
            scale_resolution_down_by,
            max_bit_rate,
        }
    }
}

/// Simulcast layers keyed by the long-edge threshold they apply from
pub type SimulcastProfiles = BTreeMap<u32, Vec<SimulcastProfile>>;

/// Default simulcast table
pub fn default_simulcast_profiles() -> SimulcastProfiles {
    let mut profiles = SimulcastProfiles::new();
    profiles.insert(320, vec![SimulcastProfile::new(1.0, 150_000)]);
    profiles.insert(
        640,
        vec![
            SimulcastProfile::new(2.0, 150_000),
            SimulcastProfile::new(1.0, 500_000),
        ],
    );
    profiles.insert(
        1280,
        vec![
            SimulcastProfile::new(4.0, 150_000),
            SimulcastProfile::new(2.0, 500_000),
            SimulcastProfile::new(1.0, 1_200_000),
        ],
    );
    profiles.insert(
        1920,
        vec![
            SimulcastProfile::new(6.0, 150_000),
            SimulcastProfile::new(3.0, 500_000),
            SimulcastProfile::new(1.0, 3_500_000),
        ],
    );
    profiles.insert(
        3840,
        vec![
            SimulcastProfile::new(12.0, 150_000),
            SimulcastProfile::new(6.0, 500_000),
            SimulcastProfile::new(1.0, 10_000_000),
        ],
    );
    profiles
}

/// Named audio configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioPreset {
    /// Speech: processing on, mono, DTX
    Conference,
    /// Music: processing off, stereo, long packets
    Hifi,
}

impl AudioPreset {
    /// Human readable name
    pub fn name(&self) -> &'static str {
        match self {
            AudioPreset::Conference => "Conference audio",
            AudioPreset::Hifi => "HiFi streaming",
        }
    }
}

/// Local media settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaSettings {
    /// Webcam resolution
    pub resolution: VideoResolution,
    /// Capture aspect ratio
    pub aspect_ratio: f64,
    /// Webcam frame rate
    pub frame_rate: u32,
    /// Send the webcam as simulcast
    pub simulcast: bool,
    /// Send screen shares as simulcast
    pub simulcast_sharing: bool,
    /// Screen share resolution
    pub screen_sharing_resolution: VideoResolution,
    /// Screen share frame rate
    pub screen_sharing_frame_rate: u32,
    /// Simulcast layers per long-edge threshold
    pub simulcast_profiles: SimulcastProfiles,
    /// Automatic gain control
    pub auto_gain_control: bool,
    /// Echo cancellation
    pub echo_cancellation: bool,
    /// Noise suppression
    pub noise_suppression: bool,
    /// Audio sample rate
    pub sample_rate: u32,
    /// Audio channel count
    pub channel_count: u32,
    /// Audio sample size in bits
    pub sample_size: u32,
    /// Opus stereo
    pub opus_stereo: bool,
    /// Opus discontinuous transmission
    pub opus_dtx: bool,
    /// Opus forward error correction
    pub opus_fec: bool,
    /// Opus packet time in milliseconds
    pub opus_ptime: u32,
    /// Opus maximum playback rate
    pub opus_max_playback_rate: u32,
    /// Speaking threshold for audio level analysis, in dB
    pub noise_threshold: f64,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            resolution: VideoResolution::Medium,
            aspect_ratio: 1.778,
            frame_rate: 30,
            simulcast: true,
            simulcast_sharing: false,
            screen_sharing_resolution: VideoResolution::VeryHigh,
            screen_sharing_frame_rate: 5,
            simulcast_profiles: default_simulcast_profiles(),
            auto_gain_control: true,
            echo_cancellation: true,
            noise_suppression: true,
            sample_rate: 48_000,
            channel_count: 1,
            sample_size: 16,
            opus_stereo: false,
            opus_dtx: true,
            opus_fec: true,
            opus_ptime: 20,
            opus_max_playback_rate: 48_000,
            noise_threshold: -60.0,
        }
    }
}

impl MediaSettings {
    /// Overwrite the audio fields with a preset
    pub fn apply_audio_preset(&mut self, preset: AudioPreset) {
        let (processing, channels, stereo, dtx, ptime) = match preset {
            AudioPreset::Conference => (true, 1, false, true, 20),
            AudioPreset::Hifi => (false, 2, true, false, 60),
        };
        self.auto_gain_control = processing;
        self.echo_cancellation = processing;
        self.noise_suppression = processing;
        self.noise_threshold = -60.0;
        self.sample_rate = 48_000;
        self.channel_count = channels;
        self.sample_size = 16;
        self.opus_stereo = stereo;
        self.opus_dtx = dtx;
        self.opus_fec = true;
        self.opus_ptime = ptime;
        self.opus_max_playback_rate = 48_000;
    }

    /// Settings with a preset applied
    pub fn with_audio_preset(mut self, preset: AudioPreset) -> Self {
        self.apply_audio_preset(preset);
        self
    }

    /// Webcam capture constraints
    pub fn webcam_constraints(&self, device_id: Option<String>) -> VideoConstraints {
        VideoConstraints {
            device_id,
            width: Some(self.resolution.width()),
            height: Some(self.resolution.height(self.aspect_ratio)),
            frame_rate: Some(self.frame_rate),
        }
    }

    /// Screen capture constraints
    pub fn screen_constraints(&self) -> VideoConstraints {
        VideoConstraints {
            device_id: None,
            width: Some(self.screen_sharing_resolution.width()),
            height: Some(self.screen_sharing_resolution.height(self.aspect_ratio)),
            frame_rate: Some(self.screen_sharing_frame_rate),
        }
    }

    /// Microphone capture constraints
    pub fn audio_constraints(&self, device_id: Option<String>) -> AudioConstraints {
        AudioConstraints {
            device_id,
            sample_rate: Some(self.sample_rate),
            channel_count: Some(self.channel_count),
            auto_gain_control: Some(self.auto_gain_control),
            echo_cancellation: Some(self.echo_cancellation),
            noise_suppression: Some(self.noise_suppression),
            sample_size: Some(self.sample_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = MediaSettings::default();
        assert_eq!(settings.resolution, VideoResolution::Medium);
        assert!(settings.simulcast);
        assert_eq!(settings.simulcast_profiles.len(), 5);
        assert_eq!(settings.simulcast_profiles[&1280].len(), 3);
        assert_eq!(settings.opus_ptime, 20);
    }

    #[test]
    fn test_resolution_dimensions() {
        assert_eq!(VideoResolution::High.width(), 1280);
        assert_eq!(VideoResolution::High.height(1.778), 720);
        assert_eq!(VideoResolution::Medium.height(1.778), 360);
        assert_eq!(VideoResolution::Ultra.width(), 3840);
    }

    #[test]
    fn test_hifi_preset() {
        let settings = MediaSettings::default().with_audio_preset(AudioPreset::Hifi);
        assert!(!settings.echo_cancellation);
        assert!(!settings.auto_gain_control);
        assert_eq!(settings.channel_count, 2);
        assert!(settings.opus_stereo);
        assert!(!settings.opus_dtx);
        assert_eq!(settings.opus_ptime, 60);

        let back = settings.with_audio_preset(AudioPreset::Conference);
        assert!(back.echo_cancellation);
        assert_eq!(back.channel_count, 1);
        assert_eq!(back.opus_ptime, 20);
    }

    #[test]
    fn test_settings_from_partial_json() {
        let settings: MediaSettings = serde_json::from_str(
            r#"{"resolution": "high", "simulcastProfiles": {"640": [{"scaleResolutionDownBy": 1, "maxBitRate": 400000}]}}"#,
        )
        .unwrap();
        assert_eq!(settings.resolution, VideoResolution::High);
        assert_eq!(settings.simulcast_profiles.len(), 1);
        assert_eq!(settings.simulcast_profiles[&640][0].max_bit_rate, 400_000);
        assert_eq!(settings.frame_rate, 30);
    }

    #[test]
    fn test_webcam_constraints() {
        let settings = MediaSettings::default();
        let constraints = settings.webcam_constraints(Some("cam-1".to_string()));
        assert_eq!(constraints.device_id.as_deref(), Some("cam-1"));
        assert_eq!(constraints.width, Some(640));
        assert_eq!(constraints.frame_rate, Some(30));
    }
}
