//! Local media tracks and the host device capability

use async_trait::async_trait;
use meetrtc_core::{MediaKind, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Kind of a host media device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Microphone
    AudioInput,
    /// Camera
    VideoInput,
    /// Speaker
    AudioOutput,
}

/// One enumerated host device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaDeviceInfo {
    /// Stable device id
    pub device_id: String,
    /// Device kind
    pub kind: DeviceKind,
    /// Human readable label, empty until permission is granted
    pub label: String,
}

impl MediaDeviceInfo {
    /// Create a device descriptor
    pub fn new(device_id: impl Into<String>, kind: DeviceKind, label: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            kind,
            label: label.into(),
        }
    }
}

/// Video capture constraints, all values ideal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoConstraints {
    /// Preferred device
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Width in pixels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Height in pixels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Frames per second
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<u32>,
}

/// Audio capture constraints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioConstraints {
    /// Preferred device
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Sample rate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    /// Channel count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_count: Option<u32>,
    /// Automatic gain control
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_gain_control: Option<bool>,
    /// Echo cancellation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub echo_cancellation: Option<bool>,
    /// Noise suppression
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noise_suppression: Option<bool>,
    /// Sample size in bits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_size: Option<u32>,
}

/// Constraints applied to an existing track
#[derive(Debug, Clone, PartialEq)]
pub enum TrackConstraints {
    /// Video track constraints
    Video(VideoConstraints),
    /// Audio track constraints
    Audio(AudioConstraints),
}

/// Capture request for [`MediaDevices`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureConstraints {
    /// Requested video, `None` for no video track
    pub video: Option<VideoConstraints>,
    /// Requested audio, `None` for no audio track
    pub audio: Option<AudioConstraints>,
}

/// Actual parameters of a live track
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackSettings {
    /// Device backing the track
    pub device_id: Option<String>,
    /// Width in pixels
    pub width: Option<u32>,
    /// Height in pixels
    pub height: Option<u32>,
    /// Frames per second
    pub frame_rate: Option<u32>,
    /// Audio sample rate
    pub sample_rate: Option<u32>,
    /// Audio channel count
    pub channel_count: Option<u32>,
}

/// Live local or remote media track
#[async_trait]
pub trait MediaTrack: Send + Sync + fmt::Debug {
    /// Track id
    fn id(&self) -> String;

    /// Track kind
    fn kind(&self) -> MediaKind;

    /// Current track parameters
    fn settings(&self) -> TrackSettings;

    /// Change capture parameters in place
    async fn apply_constraints(&self, constraints: TrackConstraints) -> Result<()>;

    /// Release the underlying capture
    fn stop(&self);

    /// Whether [`MediaTrack::stop`] was called or the source went away
    fn is_stopped(&self) -> bool;
}

/// Shared handle to a track
pub type SharedTrack = Arc<dyn MediaTrack>;

/// Host device enumeration and capture capability
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// List input and output devices
    async fn enumerate_devices(&self) -> Result<Vec<MediaDeviceInfo>>;

    /// Capture camera and/or microphone
    ///
    /// May suspend until the user answers a permission prompt.
    async fn get_user_media(&self, constraints: CaptureConstraints) -> Result<Vec<SharedTrack>>;

    /// Capture the screen, optionally with system audio
    async fn get_display_media(&self, constraints: CaptureConstraints)
        -> Result<Vec<SharedTrack>>;

    /// Whether the platform can capture the screen at all
    fn supports_display_capture(&self) -> bool;
}

/// Split captured tracks into the first track of `kind` and the rest
pub fn take_track(tracks: Vec<SharedTrack>, kind: MediaKind) -> (Option<SharedTrack>, Vec<SharedTrack>) {
    let mut wanted = None;
    let mut rest = Vec::new();
    for track in tracks {
        if wanted.is_none() && track.kind() == kind {
            wanted = Some(track);
        } else {
            rest.push(track);
        }
    }
    (wanted, rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_kind_wire_names() {
        let json = serde_json::to_string(&DeviceKind::VideoInput).unwrap();
        assert_eq!(json, "\"videoinput\"");

        let device: MediaDeviceInfo =
            serde_json::from_str(r#"{"deviceId": "abc", "kind": "audiooutput", "label": "Speakers"}"#)
                .unwrap();
        assert_eq!(device.kind, DeviceKind::AudioOutput);
        assert_eq!(device.device_id, "abc");
    }

    #[test]
    fn test_constraints_skip_unset_fields() {
        let constraints = VideoConstraints {
            width: Some(640),
            ..Default::default()
        };
        let json = serde_json::to_value(&constraints).unwrap();
        assert_eq!(json, serde_json::json!({"width": 640}));
    }
}
