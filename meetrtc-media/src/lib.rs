//! # meetrtc media
//!
//! Media transports, producers and consumers for an SFU room, built on an
//! external WebRTC engine. The engine, the host devices and the audio level
//! source are capability traits ([`MediaEngine`], [`MediaDevices`],
//! [`AudioLevelMonitor`]); this crate drives them over the signaling channel.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod device;
pub mod encodings;
pub mod engine;
pub mod producer;
pub mod settings;
pub mod track;
pub mod volume;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export main types
pub use client::{
    Consumer, MediaCapabilities, MediaChange, MediaEngineClient, MediaEvent, PeerConsumers,
    Producer,
};
pub use device::{DeviceEvent, DeviceRegistry, DevicesUpdated};
pub use encodings::{choose_encodings, get_encodings};
pub use engine::{
    CodecOptions, ConsumeOptions, EngineConsumer, EngineProducer, EngineTransport, HandleEvent,
    IceServer, MediaEngine, ProduceOptions, RtpCapabilities, RtpCodecCapability, RtpEncoding,
    TransportDirection, TransportHandler, TransportOptions,
};
pub use producer::{ProducerEvent, ProducerManager, UpdateOptions};
pub use settings::{
    default_simulcast_profiles, AudioPreset, MediaSettings, SimulcastProfile, SimulcastProfiles,
    VideoResolution,
};
pub use track::{
    AudioConstraints, CaptureConstraints, DeviceKind, MediaDeviceInfo, MediaDevices, MediaTrack,
    SharedTrack, TrackConstraints, TrackSettings, VideoConstraints,
};
pub use volume::{AudioLevelMonitor, AudioLevelOptions, Volume, VolumeSmoother, VolumeWatcher};
