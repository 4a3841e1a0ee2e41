//! Configuration types and defaults

use crate::participant::{LobbyPeer, Peer};
use meetrtc_media::MediaSettings;
use meetrtc_signaling::ChannelConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client-wide configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// Signaling server base URL, e.g. `wss://meet.example.com:443`
    pub signaling_host: String,
    /// Unique id of the local peer
    pub peer_id: String,
    /// Request timeout and retries
    pub channel: ChannelConfig,
    /// Capture, simulcast and codec settings
    pub media: MediaSettings,
}

impl ClientConfig {
    /// Config for `peer_id` on `signaling_host` with default settings
    pub fn new(signaling_host: impl Into<String>, peer_id: impl Into<String>) -> Self {
        Self {
            signaling_host: signaling_host.into(),
            peer_id: peer_id.into(),
            ..Default::default()
        }
    }

    /// Signaling URL for `room_id`
    pub fn signaling_url(&self, room_id: &str) -> String {
        format!(
            "{}/?peerId={}&roomId={}",
            self.signaling_host.trim_end_matches('/'),
            self.peer_id,
            room_id
        )
    }
}

/// Options for [`crate::MeetingClient::join`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JoinOptions {
    /// Start the webcam once joined
    pub video: bool,
    /// Start the microphone once joined
    pub audio: bool,
    /// Ask the server for TCP-only ICE candidates
    pub force_tcp: bool,
    /// Display name announced to the room
    pub display_name: String,
    /// Avatar URL announced to the room
    pub picture: String,
    /// Origin tag of this client
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

impl JoinOptions {
    /// Join as `display_name` without media
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            ..Default::default()
        }
    }

    /// Start the webcam once joined
    pub fn with_video(mut self) -> Self {
        self.video = true;
        self
    }

    /// Start the microphone once joined
    pub fn with_audio(mut self) -> Self {
        self.audio = true;
        self
    }
}

/// Answer to the `join` request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JoinResponse {
    /// Peers already in the room
    pub peers: Vec<Peer>,
    /// Peers waiting in the lobby
    pub lobby_peers: Vec<LobbyPeer>,
    /// Whether the local peer is authenticated
    pub authenticated: bool,
    /// Role ids of the local peer
    pub roles: Vec<u32>,
    /// Torrent tracker for file sharing
    pub tracker: String,
    /// Permission to role mapping of the room
    pub room_permissions: Value,
    /// Role definitions
    pub user_roles: Value,
    /// Permissions granted when nobody holds the required role
    pub allow_when_role_missing: Vec<String>,
    /// Chat messages so far
    pub chat_history: Vec<Value>,
    /// Shared files so far
    pub file_history: Vec<Value>,
    /// Recent speakers
    pub last_n_history: Vec<String>,
    /// Whether the room is locked
    pub locked: bool,
    /// Room access code, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_signaling_url() {
        let config = ClientConfig::new("wss://meet.example.com:443/", "alice");
        assert_eq!(
            config.signaling_url("standup"),
            "wss://meet.example.com:443/?peerId=alice&roomId=standup"
        );
    }

    #[test]
    fn test_client_config_from_json() {
        let config: ClientConfig = serde_json::from_value(json!({
            "signalingHost": "wss://sfu.test",
            "peerId": "bob",
            "channel": {"requestTimeoutMs": 5000},
            "media": {"resolution": "low"}
        }))
        .unwrap();

        assert_eq!(config.peer_id, "bob");
        assert_eq!(config.channel.request_timeout_ms, 5000);
        assert_eq!(config.channel.request_retries, 3);
        assert_eq!(config.media.webcam_constraints(None).width, Some(320));
    }

    #[test]
    fn test_join_response_tolerates_missing_fields() {
        let response: JoinResponse = serde_json::from_value(json!({
            "peers": [{"id": "p1", "displayName": "Alice", "roles": []}],
            "locked": true
        }))
        .unwrap();

        assert_eq!(response.peers.len(), 1);
        assert!(response.lobby_peers.is_empty());
        assert!(response.locked);
        assert!(!response.authenticated);
    }
}
