//! Media kind and source tags shared by producers and consumers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Free-form application data attached to producers and consumers
pub type AppData = serde_json::Map<String, serde_json::Value>;

/// Kind of a media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
}

impl MediaKind {
    /// Wire name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source tag of an outbound or inbound media stream
///
/// At most one non-closed local producer exists per tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaSource {
    /// Microphone
    #[serde(rename = "mic")]
    Mic,
    /// Webcam
    #[serde(rename = "webcam")]
    Webcam,
    /// Screen share video
    #[serde(rename = "screen")]
    Screen,
    /// Audio captured along with a screen share
    #[serde(rename = "screenaudio")]
    ScreenAudio,
    /// Any additional video source
    #[serde(rename = "extravideo")]
    ExtraVideo,
}

impl MediaSource {
    /// Wire name of the source tag
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaSource::Mic => "mic",
            MediaSource::Webcam => "webcam",
            MediaSource::Screen => "screen",
            MediaSource::ScreenAudio => "screenaudio",
            MediaSource::ExtraVideo => "extravideo",
        }
    }

    /// Parse a wire name, `None` for unknown tags
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "mic" => Some(MediaSource::Mic),
            "webcam" => Some(MediaSource::Webcam),
            "screen" => Some(MediaSource::Screen),
            "screenaudio" => Some(MediaSource::ScreenAudio),
            "extravideo" => Some(MediaSource::ExtraVideo),
            _ => None,
        }
    }

    /// Media kind carried by this source
    pub fn kind(&self) -> MediaKind {
        match self {
            MediaSource::Mic | MediaSource::ScreenAudio => MediaKind::Audio,
            MediaSource::Webcam | MediaSource::Screen | MediaSource::ExtraVideo => {
                MediaKind::Video
            }
        }
    }

    /// Read the `source` tag out of application data
    pub fn from_app_data(app_data: &AppData) -> Option<Self> {
        app_data
            .get("source")
            .and_then(|v| v.as_str())
            .and_then(Self::from_tag)
    }
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_tags() {
        for source in [
            MediaSource::Mic,
            MediaSource::Webcam,
            MediaSource::Screen,
            MediaSource::ScreenAudio,
            MediaSource::ExtraVideo,
        ] {
            assert_eq!(MediaSource::from_tag(source.as_str()), Some(source));
            let json = serde_json::to_string(&source).unwrap();
            assert_eq!(json, format!("\"{}\"", source.as_str()));
        }
        assert_eq!(MediaSource::from_tag("speaker"), None);
    }

    #[test]
    fn test_source_kind() {
        assert_eq!(MediaSource::Mic.kind(), MediaKind::Audio);
        assert_eq!(MediaSource::ScreenAudio.kind(), MediaKind::Audio);
        assert_eq!(MediaSource::Screen.kind(), MediaKind::Video);
    }

    #[test]
    fn test_source_from_app_data() {
        let mut app_data = AppData::new();
        assert_eq!(MediaSource::from_app_data(&app_data), None);

        app_data.insert("source".to_string(), serde_json::json!("webcam"));
        assert_eq!(
            MediaSource::from_app_data(&app_data),
            Some(MediaSource::Webcam)
        );
    }
}
