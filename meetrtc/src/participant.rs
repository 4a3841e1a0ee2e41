//! Room participants and their sparse updates

use serde::{Deserialize, Serialize};

/// Participant admitted to the room
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Peer {
    /// Peer id
    pub id: String,
    /// Display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Avatar URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    /// Origin tag of the peer's client
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Role ids
    pub roles: Vec<u32>,
    /// Hand raised
    pub raised_hand: bool,
    /// When the hand was raised, in ms since the epoch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raised_hand_timestamp: Option<u64>,
    /// Moderator request to start video pending
    pub video_in_progress: bool,
    /// Moderator request to stop video pending
    pub stop_video_in_progress: bool,
    /// Moderator request to start audio pending
    pub audio_in_progress: bool,
    /// Moderator request to stop audio pending
    pub stop_audio_in_progress: bool,
    /// Moderator request to start screen sharing pending
    pub screen_in_progress: bool,
    /// Moderator request to stop screen sharing pending
    pub stop_screen_sharing_in_progress: bool,
    /// Kick pending
    pub kick_in_progress: bool,
    /// Role change pending
    pub modify_roles_in_progress: bool,
    /// Raise-hand toggle pending
    pub raised_hand_in_progress: bool,
}

impl Peer {
    /// Peer with only an id
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Set the display name
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    /// Merge the fields `patch` defines
    ///
    /// Empty names and pictures are ignored.
    pub fn apply(&mut self, patch: &PeerPatch) {
        if let Some(display_name) = non_empty(&patch.display_name) {
            self.display_name = Some(display_name);
        }
        if let Some(picture) = non_empty(&patch.picture) {
            self.picture = Some(picture);
        }
        if let Some(raised_hand) = patch.raised_hand {
            self.raised_hand = raised_hand;
        }
        if let Some(timestamp) = patch.raised_hand_timestamp {
            self.raised_hand_timestamp = Some(timestamp);
        }

        let flags = [
            (patch.video_in_progress, &mut self.video_in_progress),
            (patch.stop_video_in_progress, &mut self.stop_video_in_progress),
            (patch.audio_in_progress, &mut self.audio_in_progress),
            (patch.stop_audio_in_progress, &mut self.stop_audio_in_progress),
            (patch.screen_in_progress, &mut self.screen_in_progress),
            (
                patch.stop_screen_sharing_in_progress,
                &mut self.stop_screen_sharing_in_progress,
            ),
            (patch.kick_in_progress, &mut self.kick_in_progress),
            (patch.modify_roles_in_progress, &mut self.modify_roles_in_progress),
            (patch.raised_hand_in_progress, &mut self.raised_hand_in_progress),
        ];
        for (value, field) in flags {
            if let Some(value) = value {
                *field = value;
            }
        }
    }
}

/// Sparse update for a [`Peer`]; `None` leaves the field untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PeerPatch {
    /// Target peer
    pub peer_id: String,
    /// New display name
    pub display_name: Option<String>,
    /// New avatar URL
    pub picture: Option<String>,
    /// Hand raised
    pub raised_hand: Option<bool>,
    /// When the hand was raised
    pub raised_hand_timestamp: Option<u64>,
    /// See [`Peer::video_in_progress`]
    pub video_in_progress: Option<bool>,
    /// See [`Peer::stop_video_in_progress`]
    pub stop_video_in_progress: Option<bool>,
    /// See [`Peer::audio_in_progress`]
    pub audio_in_progress: Option<bool>,
    /// See [`Peer::stop_audio_in_progress`]
    pub stop_audio_in_progress: Option<bool>,
    /// See [`Peer::screen_in_progress`]
    pub screen_in_progress: Option<bool>,
    /// See [`Peer::stop_screen_sharing_in_progress`]
    pub stop_screen_sharing_in_progress: Option<bool>,
    /// See [`Peer::kick_in_progress`]
    pub kick_in_progress: Option<bool>,
    /// See [`Peer::modify_roles_in_progress`]
    pub modify_roles_in_progress: Option<bool>,
    /// See [`Peer::raised_hand_in_progress`]
    pub raised_hand_in_progress: Option<bool>,
}

/// Participant waiting in the lobby
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LobbyPeer {
    /// Peer id
    pub id: String,
    /// Display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Avatar URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    /// Promotion into the room pending
    pub promotion_in_progress: bool,
}

impl LobbyPeer {
    /// Lobby peer with only an id
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Merge the fields `patch` defines
    pub fn apply(&mut self, patch: &LobbyPeerPatch) {
        if let Some(display_name) = non_empty(&patch.display_name) {
            self.display_name = Some(display_name);
        }
        if let Some(picture) = non_empty(&patch.picture) {
            self.picture = Some(picture);
        }
        if let Some(promotion) = patch.promotion_in_progress {
            self.promotion_in_progress = promotion;
        }
    }
}

/// Sparse update for a [`LobbyPeer`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LobbyPeerPatch {
    /// Target lobby peer
    pub peer_id: String,
    /// New display name
    pub display_name: Option<String>,
    /// New avatar URL
    pub picture: Option<String>,
    /// Promotion pending
    pub promotion_in_progress: Option<bool>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_peer_from_new_peer_payload() {
        let peer: Peer = serde_json::from_value(json!({
            "id": "p1",
            "displayName": "Alice",
            "picture": "https://example.test/a.png",
            "roles": [1, 4],
            "raisedHand": false,
            "raisedHandTimestamp": null
        }))
        .unwrap();

        assert_eq!(peer.id, "p1");
        assert_eq!(peer.display_name.as_deref(), Some("Alice"));
        assert_eq!(peer.roles, vec![1, 4]);
        assert_eq!(peer.raised_hand_timestamp, None);
        assert!(!peer.kick_in_progress);
    }

    #[test]
    fn test_patch_only_touches_defined_fields() {
        let mut peer = Peer::new("p1").with_display_name("Alice");
        peer.picture = Some("a.png".to_string());

        let patch: PeerPatch = serde_json::from_value(json!({
            "peerId": "p1",
            "raisedHand": true,
            "raisedHandTimestamp": 1700000000000u64
        }))
        .unwrap();
        peer.apply(&patch);

        assert_eq!(peer.display_name.as_deref(), Some("Alice"));
        assert_eq!(peer.picture.as_deref(), Some("a.png"));
        assert!(peer.raised_hand);
        assert_eq!(peer.raised_hand_timestamp, Some(1_700_000_000_000));
    }

    #[test]
    fn test_patch_ignores_empty_name() {
        let mut peer = Peer::new("p1").with_display_name("Alice");
        peer.apply(&PeerPatch {
            peer_id: "p1".to_string(),
            display_name: Some(String::new()),
            kick_in_progress: Some(true),
            ..Default::default()
        });

        assert_eq!(peer.display_name.as_deref(), Some("Alice"));
        assert!(peer.kick_in_progress);
    }

    #[test]
    fn test_lobby_peer_patch() {
        let mut peer = LobbyPeer::new("l1");
        peer.apply(&LobbyPeerPatch {
            peer_id: "l1".to_string(),
            picture: Some("l.png".to_string()),
            ..Default::default()
        });

        assert_eq!(peer.picture.as_deref(), Some("l.png"));
        assert_eq!(peer.display_name, None);
    }
}
