//! External WebRTC media engine capability
//!
//! The engine owns ICE/DTLS/SRTP and codec negotiation. meetrtc only drives
//! it: load router capabilities, create one send and one receive transport,
//! produce and consume tracks. Negotiation steps that need the server are
//! delegated back through a [`TransportHandler`].

use crate::track::SharedTrack;
use async_trait::async_trait;
use meetrtc_core::{AppData, EventStream, MediaKind, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// One codec entry of an RTP capability set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecCapability {
    /// Media kind
    pub kind: MediaKind,
    /// MIME type, e.g. `video/VP8`
    pub mime_type: String,
    /// Clock rate in Hz
    #[serde(default)]
    pub clock_rate: u32,
    /// Remaining codec fields, passed through untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// RTP capabilities of the router or the local engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCapabilities {
    /// Supported codecs in preference order
    #[serde(default)]
    pub codecs: Vec<RtpCodecCapability>,
    /// Supported header extensions
    #[serde(default)]
    pub header_extensions: Vec<Value>,
}

impl RtpCapabilities {
    /// First codec of the given kind
    pub fn first_codec(&self, kind: MediaKind) -> Option<&RtpCodecCapability> {
        self.codecs.iter().find(|c| c.kind == kind)
    }
}

/// ICE server entry passed to new transports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServer {
    /// STUN/TURN URLs
    pub urls: Vec<String>,
    /// TURN username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// TURN credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Direction of an engine transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportDirection {
    /// Sends local producers
    Send,
    /// Receives remote consumers
    Recv,
}

/// Server-side transport parameters used to build a local transport
#[derive(Debug, Clone, PartialEq)]
pub struct TransportOptions {
    /// Server transport id
    pub id: String,
    /// ICE parameters
    pub ice_parameters: Value,
    /// ICE candidates
    pub ice_candidates: Vec<Value>,
    /// DTLS parameters
    pub dtls_parameters: Value,
    /// ICE servers
    pub ice_servers: Vec<IceServer>,
}

/// One RTP encoding of an outbound stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpEncoding {
    /// Downscale factor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_resolution_down_by: Option<f64>,
    /// Bitrate ceiling in bits per second
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bitrate: Option<u64>,
    /// SVC scalability mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scalability_mode: Option<String>,
    /// Discontinuous transmission
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtx: Option<bool>,
}

/// Codec tuning passed to the engine on produce
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodecOptions {
    /// Initial video bitrate in kbps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_google_start_bitrate: Option<u32>,
    /// Opus stereo
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opus_stereo: Option<bool>,
    /// Opus DTX
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opus_dtx: Option<bool>,
    /// Opus FEC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opus_fec: Option<bool>,
    /// Opus packet time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opus_ptime: Option<u32>,
    /// Opus maximum playback rate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opus_max_playback_rate: Option<u32>,
}

/// Options for [`EngineTransport::produce`]
#[derive(Debug, Clone)]
pub struct ProduceOptions {
    /// Track to send
    pub track: SharedTrack,
    /// Simulcast or SVC encodings, empty for a single stream
    pub encodings: Vec<RtpEncoding>,
    /// Codec tuning
    pub codec_options: CodecOptions,
    /// Application data, carries the `source` tag
    pub app_data: AppData,
}

/// Options for [`EngineTransport::consume`]
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumeOptions {
    /// Consumer id assigned by the server
    pub id: String,
    /// Remote producer id
    pub producer_id: String,
    /// Media kind
    pub kind: MediaKind,
    /// RTP parameters from the server
    pub rtp_parameters: Value,
    /// Application data
    pub app_data: AppData,
}

/// Lifecycle signals raised by engine producers and consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleEvent {
    /// Owning transport closed
    TransportClosed,
    /// Underlying track ended (device unplugged, permission revoked)
    TrackEnded,
}

/// Server round trips needed while a transport negotiates
#[async_trait]
pub trait TransportHandler: Send + Sync {
    /// Complete DTLS setup for `transport_id`
    async fn on_connect(&self, transport_id: &str, dtls_parameters: Value) -> Result<()>;

    /// Register a producer server-side and return its id
    async fn on_produce(
        &self,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: Value,
        app_data: AppData,
    ) -> Result<String>;
}

/// Engine-side outbound stream
pub trait EngineProducer: Send + Sync {
    /// Producer id (server-assigned)
    fn id(&self) -> String;
    /// Media kind
    fn kind(&self) -> MediaKind;
    /// Track being sent
    fn track(&self) -> Option<SharedTrack>;
    /// Application data given on produce
    fn app_data(&self) -> AppData;
    /// Whether sending is paused
    fn is_paused(&self) -> bool;
    /// Whether the producer is closed
    fn is_closed(&self) -> bool;
    /// Pause sending
    fn pause(&self);
    /// Resume sending
    fn resume(&self);
    /// Close the producer and stop its track
    fn close(&self);
    /// Lifecycle signals
    fn subscribe(&self) -> EventStream<HandleEvent>;
}

/// Engine-side inbound stream
pub trait EngineConsumer: Send + Sync {
    /// Consumer id (server-assigned)
    fn id(&self) -> String;
    /// Remote producer id
    fn producer_id(&self) -> String;
    /// Media kind
    fn kind(&self) -> MediaKind;
    /// Received track
    fn track(&self) -> SharedTrack;
    /// Whether playback is paused
    fn is_paused(&self) -> bool;
    /// Whether the consumer is closed
    fn is_closed(&self) -> bool;
    /// Pause playback
    fn pause(&self);
    /// Resume playback
    fn resume(&self);
    /// Close the consumer
    fn close(&self);
    /// Lifecycle signals
    fn subscribe(&self) -> EventStream<HandleEvent>;
}

/// Local transport created by the engine
#[async_trait]
pub trait EngineTransport: Send + Sync {
    /// Transport id (server-assigned)
    fn id(&self) -> String;
    /// Direction
    fn direction(&self) -> TransportDirection;
    /// Send a track
    async fn produce(&self, options: ProduceOptions) -> Result<Arc<dyn EngineProducer>>;
    /// Receive a remote producer
    async fn consume(&self, options: ConsumeOptions) -> Result<Arc<dyn EngineConsumer>>;
    /// Close the transport and every producer and consumer on it
    fn close(&self);
    /// Whether the transport is closed
    fn is_closed(&self) -> bool;
}

/// WebRTC media engine
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Load the router RTP capabilities
    async fn load(&self, router_rtp_capabilities: RtpCapabilities) -> Result<()>;

    /// Whether [`MediaEngine::load`] succeeded
    fn is_loaded(&self) -> bool;

    /// Local RTP capabilities, available once loaded
    fn rtp_capabilities(&self) -> Option<RtpCapabilities>;

    /// Whether the loaded engine can send media of `kind`
    fn can_produce(&self, kind: MediaKind) -> bool;

    /// Create the transport used to send local media
    async fn create_send_transport(
        &self,
        options: TransportOptions,
        handler: Arc<dyn TransportHandler>,
    ) -> Result<Arc<dyn EngineTransport>>;

    /// Create the transport used to receive remote media
    async fn create_recv_transport(
        &self,
        options: TransportOptions,
        handler: Arc<dyn TransportHandler>,
    ) -> Result<Arc<dyn EngineTransport>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtp_capabilities_passthrough() {
        let caps: RtpCapabilities = serde_json::from_value(serde_json::json!({
            "codecs": [
                {"kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2},
                {"kind": "video", "mimeType": "video/VP8", "clockRate": 90000}
            ]
        }))
        .unwrap();

        assert_eq!(caps.codecs.len(), 2);
        assert_eq!(caps.codecs[0].extra["channels"], 2);
        assert_eq!(
            caps.first_codec(MediaKind::Video).map(|c| c.mime_type.as_str()),
            Some("video/VP8")
        );
        assert!(caps.header_extensions.is_empty());
    }

    #[test]
    fn test_encoding_serialization() {
        let encoding = RtpEncoding {
            scalability_mode: Some("S3T3".to_string()),
            dtx: Some(true),
            ..Default::default()
        };
        let json = serde_json::to_value(&encoding).unwrap();
        assert_eq!(json, serde_json::json!({"scalabilityMode": "S3T3", "dtx": true}));
    }
}
