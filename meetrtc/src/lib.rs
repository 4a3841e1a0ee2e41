//! # meetrtc - client media-signaling engine for SFU rooms
//!
//! meetrtc lets an application join a multi-party audio/video room served by
//! a Selective Forwarding Unit. It keeps three concerns behind one
//! event-driven client:
//!
//! - a request/response signaling channel with timeout and retry semantics
//! - outbound webcam, microphone and screen producers plus inbound consumers,
//!   negotiated through an external WebRTC engine
//! - the room roster, lobby and connection state, kept in sync from server
//!   notifications
//!
//! The WebRTC engine, the host's capture devices and the audio level source
//! are capability traits the host implements.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meetrtc::{Event, JoinOptions, MeetingClient, RoomEvent};
//! # use std::sync::Arc;
//!
//! # async fn example(
//! #     engine: Arc<dyn meetrtc::MediaEngine>,
//! #     devices: Arc<dyn meetrtc::MediaDevices>,
//! # ) -> meetrtc::Result<()> {
//! let client = MeetingClient::builder()
//!     .signaling_host("wss://meet.example.com:443")
//!     .peer_id("alice")
//!     .engine(engine)
//!     .media_devices(devices)
//!     .build()?;
//!
//! let mut events = client.subscribe();
//! client
//!     .join("standup", JoinOptions::new("Alice").with_video().with_audio())
//!     .await?;
//!
//! while let Some(event) = events.next().await {
//!     match event {
//!         Event::Room(RoomEvent::PeerJoin(peer)) => println!("{} joined", peer.id),
//!         Event::ClientClosed => break,
//!         other => println!("{}", other.event_type()),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export core types for easy access
pub use meetrtc_core::{AppData, EventStream, MediaKind, MediaSource, MeetRtcError, Result};

pub use meetrtc_media::{
    AudioLevelMonitor, AudioLevelOptions, Consumer, DeviceEvent, DeviceKind, DevicesUpdated,
    MediaCapabilities, MediaDeviceInfo, MediaDevices, MediaEngine, MediaEvent, MediaSettings,
    MediaTrack, PeerConsumers, Producer, ProducerEvent, UpdateOptions, Volume,
};

pub use meetrtc_signaling::{
    ChannelConfig, ChannelEvent, SignalingNotification, SignalingTransport, WebSocketTransport,
};

#[cfg(feature = "diagnostics")]
pub use meetrtc_diagnostics::{DebugLogger, LogConfig};

// Public API modules
pub mod client;
pub mod config;
pub mod event;
pub mod participant;
pub mod room;

// Re-export main API types
pub use client::{MeetingClient, MeetingClientBuilder};
pub use config::{ClientConfig, JoinOptions, JoinResponse};
pub use event::{Event, EventFilter, FilteredEventStream};
pub use participant::{LobbyPeer, LobbyPeerPatch, Peer, PeerPatch};
pub use room::{RoomConnectionState, RoomEvent, RoomRosterSync, RoomState};
