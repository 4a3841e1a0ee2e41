//! Unified client events and filtering

use crate::room::RoomEvent;
use meetrtc_core::{EventStream, MediaSource};
use meetrtc_media::{Consumer, DeviceEvent, MediaEvent, ProducerEvent};
use meetrtc_signaling::ChannelEvent;
use tokio::sync::mpsc;

/// Everything a [`crate::MeetingClient`] reports
#[derive(Debug, Clone)]
pub enum Event {
    /// Roster or room state change
    Room(RoomEvent),
    /// Consumer, remote producer or volume change
    Media(MediaEvent),
    /// Local producer started or stopped
    Producer(ProducerEvent),
    /// Device list refreshed
    Device(DeviceEvent),
    /// Signaling connection change or raw notification
    Signaling(ChannelEvent),
    /// The client was closed
    ClientClosed,
}

impl Event {
    /// Stable snake_case name of the event
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::Room(event) => match event {
                RoomEvent::StateUpdated(_) => "room_state_updated",
                RoomEvent::ActiveSpeakerChanged(_) => "active_speaker_changed",
                RoomEvent::PeerJoin(_) => "peer_join",
                RoomEvent::PeerLeave(_) => "peer_leave",
                RoomEvent::PeersUpdated(_) => "peers_updated",
                RoomEvent::LobbyPeersUpdated(_) => "lobby_peers_updated",
            },
            Event::Media(event) => match event {
                MediaEvent::ConsumerCreated { .. } => "consumer_created",
                MediaEvent::ConsumerPaused(_) => "consumer_paused",
                MediaEvent::ConsumerResumed(_) => "consumer_resumed",
                MediaEvent::ConsumerClosed(_) => "consumer_closed",
                MediaEvent::ProducerPaused(_) => "producer_paused",
                MediaEvent::ProducerResumed(_) => "producer_resumed",
                MediaEvent::ProducerClosed(_) => "producer_closed",
                MediaEvent::VolumeChanged { .. } => "volume_changed",
            },
            Event::Producer(event) => match event {
                ProducerEvent::Produce { source, .. } => match source {
                    MediaSource::Webcam => "webcam_produce",
                    MediaSource::Mic => "mic_produce",
                    MediaSource::Screen => "screen_produce",
                    MediaSource::ScreenAudio => "screen_audio_produce",
                    MediaSource::ExtraVideo => "extra_video_produce",
                },
                ProducerEvent::Close { source, .. } => match source {
                    MediaSource::Webcam => "webcam_close",
                    MediaSource::Mic => "mic_close",
                    MediaSource::Screen => "screen_close",
                    MediaSource::ScreenAudio => "screen_audio_close",
                    MediaSource::ExtraVideo => "extra_video_close",
                },
            },
            Event::Device(DeviceEvent::DevicesUpdated(_)) => "devices_updated",
            Event::Signaling(event) => match event {
                ChannelEvent::Connected => "signaling_connected",
                ChannelEvent::Disconnected => "signaling_disconnected",
                ChannelEvent::Reconnect { .. } => "signaling_reconnect",
                ChannelEvent::Notification(_) => "signaling_notification",
            },
            Event::ClientClosed => "client_closed",
        }
    }

    /// Whether this is a roster or room state event
    pub fn is_room_event(&self) -> bool {
        matches!(self, Event::Room(_))
    }

    /// Whether this is a consumer, remote producer or volume event
    pub fn is_media_event(&self) -> bool {
        matches!(self, Event::Media(_))
    }

    /// Whether this is a local producer event
    pub fn is_producer_event(&self) -> bool {
        matches!(self, Event::Producer(_))
    }

    /// Whether this is a device list event
    pub fn is_device_event(&self) -> bool {
        matches!(self, Event::Device(_))
    }

    /// Whether this changes the connection of the client
    pub fn is_connection_event(&self) -> bool {
        matches!(
            self,
            Event::Signaling(
                ChannelEvent::Connected | ChannelEvent::Disconnected | ChannelEvent::Reconnect { .. }
            ) | Event::ClientClosed
        )
    }

    /// Peer and consumer when the event changes what a remote peer shows
    ///
    /// Created and resumed consumers are playable; paused and closed ones
    /// are reported as `None`.
    pub fn peer_consumer_update(&self) -> Option<(&str, Option<&Consumer>)> {
        match self {
            Event::Media(MediaEvent::ConsumerCreated { consumer, .. })
            | Event::Media(MediaEvent::ConsumerResumed(consumer)) => {
                Some((consumer.peer_id(), Some(consumer)))
            }
            Event::Media(MediaEvent::ConsumerPaused(consumer))
            | Event::Media(MediaEvent::ConsumerClosed(consumer)) => Some((consumer.peer_id(), None)),
            _ => None,
        }
    }
}

/// Event filter for selective event processing
#[derive(Debug, Clone)]
pub struct EventFilter {
    /// Whether to include room events
    pub include_room_events: bool,
    /// Whether to include media events
    pub include_media_events: bool,
    /// Whether to include local producer events
    pub include_producer_events: bool,
    /// Whether to include device events
    pub include_device_events: bool,
    /// Whether to include connection events
    pub include_connection_events: bool,
    /// Specific event types to include (if specified, overrides other filters)
    pub specific_event_types: Option<Vec<String>>,
}

impl EventFilter {
    /// Create a filter that includes all events
    ///
    /// Raw signaling notifications belong to no category and only pass a
    /// [`EventFilter::specific`] filter naming `signaling_notification`.
    pub fn all() -> Self {
        Self {
            include_room_events: true,
            include_media_events: true,
            include_producer_events: true,
            include_device_events: true,
            include_connection_events: true,
            specific_event_types: None,
        }
    }

    fn none() -> Self {
        Self {
            include_room_events: false,
            include_media_events: false,
            include_producer_events: false,
            include_device_events: false,
            include_connection_events: false,
            specific_event_types: None,
        }
    }

    /// Create a filter that includes only room events
    pub fn room_only() -> Self {
        Self {
            include_room_events: true,
            ..Self::none()
        }
    }

    /// Create a filter that includes only media events
    pub fn media_only() -> Self {
        Self {
            include_media_events: true,
            ..Self::none()
        }
    }

    /// Create a filter that includes only local producer events
    pub fn producer_only() -> Self {
        Self {
            include_producer_events: true,
            ..Self::none()
        }
    }

    /// Create a filter that includes only connection events
    pub fn connection_only() -> Self {
        Self {
            include_connection_events: true,
            ..Self::none()
        }
    }

    /// Create a filter for specific event types
    pub fn specific(event_types: Vec<String>) -> Self {
        Self {
            specific_event_types: Some(event_types),
            ..Self::none()
        }
    }

    /// Check if an event should be included based on this filter
    pub fn should_include(&self, event: &Event) -> bool {
        if let Some(ref specific_types) = self.specific_event_types {
            return specific_types.iter().any(|t| t == event.event_type());
        }

        (self.include_room_events && event.is_room_event())
            || (self.include_media_events && event.is_media_event())
            || (self.include_producer_events && event.is_producer_event())
            || (self.include_device_events && event.is_device_event())
            || (self.include_connection_events && event.is_connection_event())
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::all()
    }
}

/// Filtered event stream that only yields events matching a filter
#[derive(Debug)]
pub struct FilteredEventStream {
    stream: EventStream<Event>,
    filter: EventFilter,
}

impl FilteredEventStream {
    /// Create a new filtered event stream
    pub fn new(stream: EventStream<Event>, filter: EventFilter) -> Self {
        Self { stream, filter }
    }

    /// Get the next event that matches the filter
    pub async fn next(&mut self) -> Option<Event> {
        while let Some(event) = self.stream.next().await {
            if self.filter.should_include(&event) {
                return Some(event);
            }
        }
        None
    }

    /// Try to get the next filtered event without blocking
    pub fn try_next(&mut self) -> Result<Option<Event>, mpsc::error::TryRecvError> {
        while let Some(event) = self.stream.try_next()? {
            if self.filter.should_include(&event) {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    /// Update the filter
    pub fn set_filter(&mut self, filter: EventFilter) {
        self.filter = filter;
    }

    /// Get the current filter
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }
}
