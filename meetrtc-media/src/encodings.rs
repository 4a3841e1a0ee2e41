//! Simulcast and SVC encoding selection

use crate::engine::{RtpCapabilities, RtpEncoding};
use crate::settings::{SimulcastProfile, SimulcastProfiles};
use meetrtc_core::{MediaKind, MeetRtcError, Result};

/// VP9 webcam: one key-frame-dependent spatial/temporal layer set
const VIDEO_KSVC_MODE: &str = "S3T3_KEY";

/// VP9 screen share
const VIDEO_SVC_MODE: &str = "S3T3";

fn ksvc_encodings() -> Vec<RtpEncoding> {
    vec![RtpEncoding {
        scalability_mode: Some(VIDEO_KSVC_MODE.to_string()),
        ..Default::default()
    }]
}

fn svc_encodings() -> Vec<RtpEncoding> {
    vec![RtpEncoding {
        scalability_mode: Some(VIDEO_SVC_MODE.to_string()),
        dtx: Some(true),
        ..Default::default()
    }]
}

impl From<&SimulcastProfile> for RtpEncoding {
    fn from(profile: &SimulcastProfile) -> Self {
        RtpEncoding {
            scale_resolution_down_by: Some(profile.scale_resolution_down_by),
            max_bitrate: Some(profile.max_bit_rate),
            ..Default::default()
        }
    }
}

/// Encodings for a video track of `width` x `height`
///
/// VP9 as the first video codec selects SVC; anything else picks a simulcast
/// profile by the long edge of the capture.
pub fn get_encodings(
    rtp_capabilities: &RtpCapabilities,
    profiles: &SimulcastProfiles,
    width: Option<u32>,
    height: Option<u32>,
    screen_sharing: bool,
) -> Result<Vec<RtpEncoding>> {
    let (width, height) = match (width, height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(MeetRtcError::capability("missing width or height")),
    };

    let codec = rtp_capabilities
        .first_codec(MediaKind::Video)
        .ok_or_else(|| MeetRtcError::capability("No video codecs"))?;

    if codec.mime_type.eq_ignore_ascii_case("video/vp9") {
        return Ok(if screen_sharing {
            svc_encodings()
        } else {
            ksvc_encodings()
        });
    }

    Ok(choose_encodings(profiles, width.max(height)))
}

/// Pick the simulcast layers for a capture whose long edge is `size`
///
/// The largest threshold not above `size` wins; below every threshold the
/// smallest profile is used. A single layer is sent twice since the engine
/// needs at least two.
pub fn choose_encodings(profiles: &SimulcastProfiles, size: u32) -> Vec<RtpEncoding> {
    let selected = profiles
        .iter()
        .rev()
        .find(|(threshold, _)| **threshold <= size)
        .or_else(|| profiles.iter().next())
        .map(|(_, layers)| layers.iter().map(RtpEncoding::from).collect::<Vec<_>>())
        .unwrap_or_default();

    let mut encodings = selected;
    if encodings.len() == 1 {
        let first = encodings[0].clone();
        encodings.push(first);
    }
    encodings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::default_simulcast_profiles;

    fn caps(mime_type: &str) -> RtpCapabilities {
        serde_json::from_value(serde_json::json!({
            "codecs": [
                {"kind": "audio", "mimeType": "audio/opus", "clockRate": 48000},
                {"kind": "video", "mimeType": mime_type, "clockRate": 90000}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_single_layer_is_duplicated() {
        let encodings = choose_encodings(&default_simulcast_profiles(), 320);
        assert_eq!(encodings.len(), 2);
        assert_eq!(encodings[0], encodings[1]);
        assert_eq!(encodings[0].max_bitrate, Some(150_000));
    }

    #[test]
    fn test_vp9_uses_svc() {
        let profiles = default_simulcast_profiles();

        let webcam = get_encodings(&caps("video/VP9"), &profiles, Some(1280), Some(720), false)
            .unwrap();
        assert_eq!(webcam.len(), 1);
        assert_eq!(webcam[0].scalability_mode.as_deref(), Some("S3T3_KEY"));
        assert_eq!(webcam[0].dtx, None);

        let screen = get_encodings(&caps("video/vp9"), &profiles, Some(1920), Some(1080), true)
            .unwrap();
        assert_eq!(screen[0].scalability_mode.as_deref(), Some("S3T3"));
        assert_eq!(screen[0].dtx, Some(true));
    }

    #[test]
    fn test_missing_dimensions() {
        let err = get_encodings(
            &caps("video/VP8"),
            &default_simulcast_profiles(),
            Some(1280),
            None,
            false,
        )
        .unwrap_err();
        assert_eq!(err.error_code(), "CAPABILITY_ERROR");
    }

    #[test]
    fn test_no_video_codec() {
        let audio_only: RtpCapabilities = serde_json::from_value(serde_json::json!({
            "codecs": [{"kind": "audio", "mimeType": "audio/opus", "clockRate": 48000}]
        }))
        .unwrap();
        let err = get_encodings(&audio_only, &default_simulcast_profiles(), Some(640), Some(360), false)
            .unwrap_err();
        assert!(err.to_string().contains("No video codecs"));
    }
}
