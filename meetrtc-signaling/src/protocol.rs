//! Signaling protocol messages
//!
//! Requests and notifications travel as `{method, data}` pairs. The typed
//! payload structs below mirror the JSON the room server expects
//! (`camelCase` field names).

use meetrtc_core::{AppData, MediaKind, MeetRtcError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request and notification method names used by the room server
pub mod methods {
    /// Fetch the router RTP capabilities
    pub const GET_ROUTER_RTP_CAPABILITIES: &str = "getRouterRtpCapabilities";
    /// Create a WebRTC transport on the server
    pub const CREATE_WEBRTC_TRANSPORT: &str = "createWebRtcTransport";
    /// Complete DTLS negotiation of a transport
    pub const CONNECT_WEBRTC_TRANSPORT: &str = "connectWebRtcTransport";
    /// Register a new producer
    pub const PRODUCE: &str = "produce";
    /// Join the room
    pub const JOIN: &str = "join";
    /// Pause a consumer server-side
    pub const PAUSE_CONSUMER: &str = "pauseConsumer";
    /// Resume a consumer server-side
    pub const RESUME_CONSUMER: &str = "resumeConsumer";
    /// Close a consumer server-side
    pub const CLOSE_CONSUMER: &str = "closeConsumer";
    /// Pause a producer server-side
    pub const PAUSE_PRODUCER: &str = "pauseProducer";
    /// Resume a producer server-side
    pub const RESUME_PRODUCER: &str = "resumeProducer";
    /// Close a producer server-side
    pub const CLOSE_PRODUCER: &str = "closeProducer";

    /// Server created a consumer for this client
    pub const NEW_CONSUMER: &str = "newConsumer";
    /// Consumer paused by the server
    pub const CONSUMER_PAUSED: &str = "consumerPaused";
    /// Consumer resumed by the server
    pub const CONSUMER_RESUMED: &str = "consumerResumed";
    /// Consumer closed by the server
    pub const CONSUMER_CLOSED: &str = "consumerClosed";
    /// Producer paused by the server
    pub const PRODUCER_PAUSED: &str = "producerPaused";
    /// Producer resumed by the server
    pub const PRODUCER_RESUMED: &str = "producerResumed";
    /// Producer closed by the server
    pub const PRODUCER_CLOSED: &str = "producerClosed";

    /// Room admitted this client
    pub const ROOM_READY: &str = "roomReady";
    /// Client was parked in the lobby
    pub const ENTERED_LOBBY: &str = "enteredLobby";
    /// Room is full
    pub const OVER_ROOM_LIMIT: &str = "overRoomLimit";
    /// Room came back after a server-side interruption
    pub const ROOM_BACK: &str = "roomBack";
    /// Active speaker changed
    pub const ACTIVE_SPEAKER: &str = "activeSpeaker";
    /// A peer joined
    pub const NEW_PEER: &str = "newPeer";
    /// A peer left
    pub const PEER_CLOSED: &str = "peerClosed";
    /// A peer changed its display name
    pub const CHANGE_DISPLAY_NAME: &str = "changeDisplayName";
    /// A peer changed its picture
    pub const CHANGE_PICTURE: &str = "changePicture";
    /// A peer raised or lowered its hand
    pub const RAISED_HAND: &str = "raisedHand";
    /// A peer entered the lobby
    pub const PARKED_PEER: &str = "parkedPeer";
    /// Lobby snapshot
    pub const PARKED_PEERS: &str = "parkedPeers";
    /// A lobby peer left
    pub const LOBBY_PEER_CLOSED: &str = "lobby:peerClosed";
    /// A lobby peer was admitted
    pub const LOBBY_PROMOTED_PEER: &str = "lobby:promotedPeer";
    /// A lobby peer changed its display name
    pub const LOBBY_CHANGE_DISPLAY_NAME: &str = "lobby:changeDisplayName";
    /// A lobby peer changed its picture
    pub const LOBBY_CHANGE_PICTURE: &str = "lobby:changePicture";
}

/// Outbound request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalingRequest {
    /// Method name
    pub method: String,
    /// Request payload
    #[serde(default)]
    pub data: Value,
}

impl SignalingRequest {
    /// Create a new request
    pub fn new(method: impl Into<String>, data: Value) -> Self {
        Self {
            method: method.into(),
            data,
        }
    }
}

/// Inbound server push message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalingNotification {
    /// Method name
    pub method: String,
    /// Notification payload
    #[serde(default)]
    pub data: Value,
}

impl SignalingNotification {
    /// Create a new notification
    pub fn new(method: impl Into<String>, data: Value) -> Self {
        Self {
            method: method.into(),
            data,
        }
    }

    /// Decode the payload into a typed struct
    ///
    /// A missing payload decodes as an empty object.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, MeetRtcError> {
        decode(&self.method, &self.data)
    }
}

/// Decode a JSON payload, mapping failures to [`MeetRtcError::InvalidMessage`]
pub fn decode<T: DeserializeOwned>(method: &str, data: &Value) -> Result<T, MeetRtcError> {
    let value = match data {
        Value::Null => Value::Object(serde_json::Map::new()),
        other => other.clone(),
    };
    serde_json::from_value(value).map_err(|e| MeetRtcError::InvalidMessage {
        method: method.to_string(),
        source: e,
    })
}

/// `createWebRtcTransport` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWebRtcTransport {
    /// Force TCP candidates
    pub force_tcp: bool,
    /// Transport will send media
    pub producing: bool,
    /// Transport will receive media
    pub consuming: bool,
}

/// `createWebRtcTransport` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebRtcTransportInfo {
    /// Server-side transport id
    pub id: String,
    /// ICE parameters
    pub ice_parameters: Value,
    /// ICE candidates
    #[serde(default)]
    pub ice_candidates: Vec<Value>,
    /// DTLS parameters
    pub dtls_parameters: Value,
}

/// `connectWebRtcTransport` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectWebRtcTransport {
    /// Transport being connected
    pub transport_id: String,
    /// Local DTLS parameters
    pub dtls_parameters: Value,
}

/// `produce` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceData {
    /// Send transport id
    pub transport_id: String,
    /// Media kind
    pub kind: MediaKind,
    /// Negotiated RTP parameters
    pub rtp_parameters: Value,
    /// Application data (carries the `source` tag)
    #[serde(default)]
    pub app_data: AppData,
}

/// `produce` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProduceResponse {
    /// Server-assigned producer id
    pub id: String,
}

/// Payload of consumer requests and consumer notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerData {
    /// Consumer id
    pub consumer_id: String,
}

/// Payload of producer requests and producer notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerData {
    /// Producer id
    pub producer_id: String,
}

/// `newConsumer` notification payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConsumerData {
    /// Owning remote peer
    pub peer_id: String,
    /// Remote producer being consumed
    pub producer_id: String,
    /// Consumer id
    pub id: String,
    /// Media kind
    pub kind: MediaKind,
    /// RTP parameters for the consumer
    pub rtp_parameters: Value,
    /// Consumer type (simple, simulcast, svc)
    #[serde(default, rename = "type")]
    pub consumer_type: Option<String>,
    /// Application data of the remote producer
    #[serde(default)]
    pub app_data: AppData,
    /// Whether the remote producer is paused server-side
    #[serde(default)]
    pub producer_paused: bool,
}

/// `join` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinData {
    /// Display name
    pub display_name: String,
    /// Avatar URL
    pub picture: String,
    /// Origin tag of the client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Local RTP capabilities
    pub rtp_capabilities: Value,
    /// Re-joining after a drop
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returning: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_transport_serialization() {
        let data = CreateWebRtcTransport {
            force_tcp: false,
            producing: true,
            consuming: false,
        };
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(
            json,
            json!({"forceTcp": false, "producing": true, "consuming": false})
        );
    }

    #[test]
    fn test_new_consumer_payload() {
        let notification = SignalingNotification::new(
            methods::NEW_CONSUMER,
            json!({
                "peerId": "p1",
                "producerId": "prod-1",
                "id": "cons-1",
                "kind": "video",
                "rtpParameters": {},
                "type": "simulcast",
                "appData": {"source": "webcam"},
                "producerPaused": true
            }),
        );

        let data: NewConsumerData = notification.payload().unwrap();
        assert_eq!(data.peer_id, "p1");
        assert_eq!(data.kind, MediaKind::Video);
        assert_eq!(data.consumer_type.as_deref(), Some("simulcast"));
        assert!(data.producer_paused);
    }

    #[test]
    fn test_missing_payload_decodes_as_empty_object() {
        #[derive(Deserialize)]
        struct Empty {}

        let notification = SignalingNotification::new(methods::ENTERED_LOBBY, Value::Null);
        assert!(notification.payload::<Empty>().is_ok());
    }

    #[test]
    fn test_malformed_payload_is_invalid_message() {
        let notification = SignalingNotification::new(methods::CONSUMER_PAUSED, json!({"foo": 1}));
        let err = notification.payload::<ConsumerData>().unwrap_err();
        match err {
            MeetRtcError::InvalidMessage { method, .. } => assert_eq!(method, "consumerPaused"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_join_data_skips_absent_fields() {
        let data = JoinData {
            display_name: "Alice".to_string(),
            picture: String::new(),
            from: None,
            rtp_capabilities: json!({"codecs": []}),
            returning: None,
        };
        let json = serde_json::to_value(&data).unwrap();
        assert!(json.get("from").is_none());
        assert!(json.get("returning").is_none());
        assert_eq!(json["displayName"], "Alice");
    }
}
