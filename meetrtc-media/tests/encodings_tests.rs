//! Simulcast profile selection and media settings
//!
//! Exercises the encoding table lookup across capture sizes and the settings
//! that feed it, through the public API only.

use meetrtc_media::*;

fn router_caps(video_mime_type: &str) -> RtpCapabilities {
    serde_json::from_value(serde_json::json!({
        "codecs": [
            {"kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2},
            {"kind": "video", "mimeType": video_mime_type, "clockRate": 90000}
        ]
    }))
    .unwrap()
}

fn bitrates(encodings: &[RtpEncoding]) -> Vec<u64> {
    encodings.iter().filter_map(|e| e.max_bitrate).collect()
}

// ============================================================================
// PROFILE SELECTION
// ============================================================================

#[test]
fn test_exact_threshold_selects_profile() {
    let encodings = get_encodings(
        &router_caps("video/VP8"),
        &default_simulcast_profiles(),
        Some(1280),
        Some(720),
        false,
    )
    .unwrap();

    assert_eq!(bitrates(&encodings), vec![150_000, 500_000, 1_200_000]);
    let scalings: Vec<f64> = encodings
        .iter()
        .filter_map(|e| e.scale_resolution_down_by)
        .collect();
    assert_eq!(scalings, vec![4.0, 2.0, 1.0]);
}

#[test]
fn test_between_thresholds_rounds_down() {
    let profiles = default_simulcast_profiles();
    assert_eq!(
        bitrates(&choose_encodings(&profiles, 1000)),
        vec![150_000, 500_000]
    );
    assert_eq!(
        bitrates(&choose_encodings(&profiles, 1919)),
        vec![150_000, 500_000, 1_200_000]
    );
    assert_eq!(
        bitrates(&choose_encodings(&profiles, 8000)),
        vec![150_000, 500_000, 10_000_000]
    );
}

#[test]
fn test_below_smallest_threshold_uses_smallest_profile() {
    let encodings = choose_encodings(&default_simulcast_profiles(), 160);
    assert_eq!(bitrates(&encodings), vec![150_000, 150_000]);
}

#[test]
fn test_portrait_capture_uses_long_edge() {
    let encodings = get_encodings(
        &router_caps("video/H264"),
        &default_simulcast_profiles(),
        Some(1080),
        Some(1920),
        false,
    )
    .unwrap();
    assert_eq!(bitrates(&encodings), vec![150_000, 500_000, 3_500_000]);
}

#[test]
fn test_custom_profile_table() {
    let mut profiles = SimulcastProfiles::new();
    profiles.insert(480, vec![SimulcastProfile::new(1.0, 300_000)]);
    profiles.insert(
        960,
        vec![
            SimulcastProfile::new(2.0, 200_000),
            SimulcastProfile::new(1.0, 800_000),
        ],
    );

    assert_eq!(bitrates(&choose_encodings(&profiles, 960)), vec![200_000, 800_000]);
    assert_eq!(bitrates(&choose_encodings(&profiles, 640)), vec![300_000, 300_000]);
}

#[test]
fn test_empty_profile_table() {
    assert!(choose_encodings(&SimulcastProfiles::new(), 1280).is_empty());
}

// ============================================================================
// SETTINGS
// ============================================================================

#[test]
fn test_settings_from_json() {
    let settings: MediaSettings = serde_json::from_value(serde_json::json!({
        "resolution": "high",
        "frameRate": 15,
        "simulcastSharing": true
    }))
    .unwrap();

    assert_eq!(settings.resolution, VideoResolution::High);
    assert_eq!(settings.frame_rate, 15);
    assert!(settings.simulcast_sharing);
    assert!(settings.simulcast);
    assert_eq!(settings.sample_rate, 48_000);

    let constraints = settings.webcam_constraints(Some("cam-1".to_string()));
    assert_eq!(constraints.width, Some(1280));
    assert_eq!(constraints.height, Some(720));
    assert_eq!(constraints.frame_rate, Some(15));
}

#[test]
fn test_hifi_preset() {
    let settings = MediaSettings::default().with_audio_preset(AudioPreset::Hifi);
    assert!(settings.opus_stereo);
    assert!(!settings.opus_dtx);
    assert!(!settings.echo_cancellation);
    assert_eq!(settings.channel_count, 2);

    let audio = settings.audio_constraints(None);
    assert_eq!(audio.channel_count, Some(2));
    assert_eq!(audio.noise_suppression, Some(false));
}
