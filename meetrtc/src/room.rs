//! Room state and roster synchronisation
//!
//! [`RoomRosterSync`] drains the signaling notifications in one task and
//! keeps the peer roster, the lobby roster and the [`RoomState`] current.
//! Handlers run one at a time in arrival order; a notification that fails to
//! decode is logged and skipped.

use crate::participant::{LobbyPeer, LobbyPeerPatch, Peer, PeerPatch};
use meetrtc_core::{Emitter, EventStream, MeetRtcError, Result};
use meetrtc_media::IceServer;
use meetrtc_signaling::{methods, ChannelEvent, SignalingChannel, SignalingNotification};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Connection state of the room session
///
/// Ordered: the state only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomConnectionState {
    /// Nothing attempted yet
    New,
    /// Join in progress
    Connecting,
    /// Joined
    Connected,
    /// Signaling dropped unexpectedly
    Disconnected,
    /// Client closed
    Closed,
}

impl RoomConnectionState {
    /// Wire name of the state
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomConnectionState::New => "new",
            RoomConnectionState::Connecting => "connecting",
            RoomConnectionState::Connected => "connected",
            RoomConnectionState::Disconnected => "disconnected",
            RoomConnectionState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for RoomConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Room-level state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomState {
    /// Connection state
    pub state: RoomConnectionState,
    /// The server reported the room ready
    pub joined: bool,
    /// Waiting in the lobby
    pub in_lobby: bool,
    /// The room refused us for being full
    pub over_room_limit: bool,
    /// Peer currently speaking
    pub active_speaker_id: Option<String>,
    /// Peers selected for display
    pub selected_peers: Vec<String>,
    /// Peers pinned for display
    pub spotlights: Vec<String>,
}

impl Default for RoomState {
    fn default() -> Self {
        Self {
            state: RoomConnectionState::New,
            joined: false,
            in_lobby: false,
            over_room_limit: false,
            active_speaker_id: None,
            selected_peers: Vec::new(),
            spotlights: Vec::new(),
        }
    }
}

/// Roster and room state events
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    /// Room state changed
    StateUpdated(RoomState),
    /// Active speaker changed, `None` when nobody speaks
    ActiveSpeakerChanged(Option<String>),
    /// A peer entered the roster
    PeerJoin(Peer),
    /// A peer left; carries its last known data
    PeerLeave(Peer),
    /// Roster snapshot after any change
    PeersUpdated(Vec<Peer>),
    /// Lobby roster snapshot after any change
    LobbyPeersUpdated(Vec<LobbyPeer>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PeerIdData {
    peer_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActiveSpeakerData {
    #[serde(default)]
    peer_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RoomReadyData {
    turn_servers: Vec<IceServer>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ParkedPeersData {
    lobby_peers: Vec<LobbyPeer>,
}

#[derive(Default)]
struct Roster {
    room: RoomState,
    ice_servers: Vec<IceServer>,
    peers: Vec<Peer>,
    lobby_peers: Vec<LobbyPeer>,
}

struct RoomInner {
    roster: RwLock<Roster>,
    initialized: AtomicBool,
    events: Emitter<RoomEvent>,
}

/// Keeps the room roster in sync with server notifications
pub struct RoomRosterSync {
    inner: Arc<RoomInner>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl RoomRosterSync {
    /// Start following the notifications of `channel`
    ///
    /// Must be called inside a Tokio runtime, before the join request so no
    /// roster notification is missed.
    pub fn new(channel: &SignalingChannel) -> Self {
        let subscription = channel.subscribe();
        let inner = Arc::new(RoomInner {
            roster: RwLock::new(Roster::default()),
            initialized: AtomicBool::new(false),
            events: Emitter::new(),
        });
        let listener = tokio::spawn(drain_notifications(subscription, Arc::downgrade(&inner)));
        Self {
            inner,
            listener: Mutex::new(Some(listener)),
        }
    }

    /// Subscribe to room events
    pub fn subscribe(&self) -> EventStream<RoomEvent> {
        self.inner.events.subscribe()
    }

    /// Seed both rosters from the join response
    ///
    /// Emits `PeerJoin` for every seeded peer not already known, then the
    /// roster snapshots. Only the first call has any effect.
    pub fn init(&self, peers: Vec<Peer>, lobby_peers: Vec<LobbyPeer>) -> Result<()> {
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            return Err(MeetRtcError::invalid_operation("room roster already initialized"));
        }
        debug!(peers = peers.len(), lobby_peers = lobby_peers.len(), "init()");

        let mut joined = Vec::new();
        let (peers_snapshot, lobby_snapshot) = {
            let mut roster = self.inner.roster.write();
            for peer in peers {
                if roster.peers.iter().all(|p| p.id != peer.id) {
                    roster.peers.push(peer.clone());
                    joined.push(peer);
                }
            }
            for lobby_peer in lobby_peers {
                if roster.lobby_peers.iter().all(|p| p.id != lobby_peer.id) {
                    roster.lobby_peers.push(lobby_peer);
                }
            }
            (roster.peers.clone(), roster.lobby_peers.clone())
        };

        let seeded = !joined.is_empty();
        for peer in joined {
            self.inner.events.emit(RoomEvent::PeerJoin(peer));
        }
        if seeded {
            self.inner.events.emit(RoomEvent::PeersUpdated(peers_snapshot));
        }
        if !lobby_snapshot.is_empty() {
            self.inner.events.emit(RoomEvent::LobbyPeersUpdated(lobby_snapshot));
        }
        Ok(())
    }

    /// Move the connection state forward
    ///
    /// Returns `false`, without emitting, when `state` is not ahead of the
    /// current one.
    pub fn set_connection_state(&self, state: RoomConnectionState) -> bool {
        let snapshot = {
            let mut roster = self.inner.roster.write();
            if state <= roster.room.state {
                debug!(current = %roster.room.state, requested = %state, "Ignoring room state regression");
                return false;
            }
            roster.room.state = state;
            roster.room.clone()
        };
        info!(state = %state, "Room connection state changed");
        self.inner.events.emit(RoomEvent::StateUpdated(snapshot));
        true
    }

    /// Current room state
    pub fn state(&self) -> RoomState {
        self.inner.roster.read().room.clone()
    }

    /// Current connection state
    pub fn connection_state(&self) -> RoomConnectionState {
        self.inner.roster.read().room.state
    }

    /// Peer currently speaking
    pub fn active_speaker_id(&self) -> Option<String> {
        self.inner.roster.read().room.active_speaker_id.clone()
    }

    /// ICE servers announced by `roomReady`
    pub fn ice_servers(&self) -> Vec<IceServer> {
        self.inner.roster.read().ice_servers.clone()
    }

    /// Peers in the room
    pub fn peers(&self) -> Vec<Peer> {
        self.inner.roster.read().peers.clone()
    }

    /// Peer by id
    pub fn peer(&self, peer_id: &str) -> Option<Peer> {
        self.inner
            .roster
            .read()
            .peers
            .iter()
            .find(|p| p.id == peer_id)
            .cloned()
    }

    /// Peers waiting in the lobby
    pub fn lobby_peers(&self) -> Vec<LobbyPeer> {
        self.inner.roster.read().lobby_peers.clone()
    }

    /// Stop following notifications and mark the room closed
    pub fn close(&self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
        self.set_connection_state(RoomConnectionState::Closed);
    }
}

impl std::fmt::Debug for RoomRosterSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let roster = self.inner.roster.read();
        f.debug_struct("RoomRosterSync")
            .field("state", &roster.room.state)
            .field("peers", &roster.peers.len())
            .field("lobby_peers", &roster.lobby_peers.len())
            .finish()
    }
}

impl Drop for RoomRosterSync {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
    }
}

impl RoomInner {
    fn handle_notification(&self, notification: &SignalingNotification) -> Result<()> {
        match notification.method.as_str() {
            methods::ROOM_READY => {
                let data: RoomReadyData = notification.payload()?;
                let snapshot = {
                    let mut roster = self.roster.write();
                    roster.ice_servers = data.turn_servers;
                    roster.room.in_lobby = false;
                    roster.room.joined = true;
                    roster.room.clone()
                };
                self.events.emit(RoomEvent::StateUpdated(snapshot));
            }
            methods::ENTERED_LOBBY => self.update_room(|room| room.in_lobby = true),
            methods::OVER_ROOM_LIMIT => self.update_room(|room| room.over_room_limit = true),
            methods::ROOM_BACK => debug!("Room back"),
            methods::ACTIVE_SPEAKER => {
                let data: ActiveSpeakerData = notification.payload()?;
                self.roster.write().room.active_speaker_id = data.peer_id.clone();
                self.events.emit(RoomEvent::ActiveSpeakerChanged(data.peer_id));
            }
            methods::NEW_PEER => {
                let peer: Peer = notification.payload()?;
                self.add_peer(peer);
            }
            methods::PEER_CLOSED => {
                let data: PeerIdData = notification.payload()?;
                self.remove_peer(&data.peer_id);
            }
            methods::CHANGE_DISPLAY_NAME | methods::CHANGE_PICTURE | methods::RAISED_HAND => {
                let patch: PeerPatch = notification.payload()?;
                self.patch_peer(&patch);
            }
            methods::PARKED_PEER => {
                let data: PeerIdData = notification.payload()?;
                self.add_lobby_peers(vec![LobbyPeer::new(data.peer_id)]);
            }
            methods::PARKED_PEERS => {
                let data: ParkedPeersData = notification.payload()?;
                self.add_lobby_peers(data.lobby_peers);
            }
            methods::LOBBY_PEER_CLOSED | methods::LOBBY_PROMOTED_PEER => {
                let data: PeerIdData = notification.payload()?;
                self.remove_lobby_peer(&data.peer_id);
            }
            methods::LOBBY_CHANGE_DISPLAY_NAME | methods::LOBBY_CHANGE_PICTURE => {
                let patch: LobbyPeerPatch = notification.payload()?;
                self.patch_lobby_peer(&patch);
            }
            _ => {}
        }
        Ok(())
    }

    fn update_room(&self, update: impl FnOnce(&mut RoomState)) {
        let snapshot = {
            let mut roster = self.roster.write();
            update(&mut roster.room);
            roster.room.clone()
        };
        self.events.emit(RoomEvent::StateUpdated(snapshot));
    }

    fn add_peer(&self, peer: Peer) {
        let (known, snapshot) = {
            let mut roster = self.roster.write();
            let known = match roster.peers.iter_mut().find(|p| p.id == peer.id) {
                Some(existing) => {
                    *existing = peer.clone();
                    true
                }
                None => {
                    roster.peers.push(peer.clone());
                    false
                }
            };
            (known, roster.peers.clone())
        };

        if known {
            debug!(peer_id = %peer.id, "Replacing known peer");
        } else {
            debug!(peer_id = %peer.id, "Peer joined");
            self.events.emit(RoomEvent::PeerJoin(peer));
        }
        self.events.emit(RoomEvent::PeersUpdated(snapshot));
    }

    fn remove_peer(&self, peer_id: &str) {
        let (removed, snapshot) = {
            let mut roster = self.roster.write();
            let index = roster.peers.iter().position(|p| p.id == peer_id);
            let removed = index.map(|index| roster.peers.remove(index));
            (removed, roster.peers.clone())
        };

        match removed {
            Some(peer) => {
                debug!(peer_id = %peer_id, "Peer left");
                self.events.emit(RoomEvent::PeerLeave(peer));
            }
            None => debug!(peer_id = %peer_id, "peerClosed for unknown peer"),
        }
        self.events.emit(RoomEvent::PeersUpdated(snapshot));
    }

    fn patch_peer(&self, patch: &PeerPatch) {
        let snapshot = {
            let mut roster = self.roster.write();
            match roster.peers.iter_mut().find(|p| p.id == patch.peer_id) {
                Some(peer) => {
                    peer.apply(patch);
                    Some(roster.peers.clone())
                }
                None => None,
            }
        };

        match snapshot {
            Some(peers) => {
                self.events.emit(RoomEvent::PeersUpdated(peers));
            }
            None => debug!(peer_id = %patch.peer_id, "Update for unknown peer"),
        }
    }

    fn add_lobby_peers(&self, lobby_peers: Vec<LobbyPeer>) {
        let snapshot = {
            let mut roster = self.roster.write();
            for lobby_peer in lobby_peers {
                match roster.lobby_peers.iter_mut().find(|p| p.id == lobby_peer.id) {
                    Some(existing) => *existing = lobby_peer,
                    None => roster.lobby_peers.push(lobby_peer),
                }
            }
            roster.lobby_peers.clone()
        };
        self.events.emit(RoomEvent::LobbyPeersUpdated(snapshot));
    }

    fn remove_lobby_peer(&self, peer_id: &str) {
        let snapshot = {
            let mut roster = self.roster.write();
            let before = roster.lobby_peers.len();
            roster.lobby_peers.retain(|p| p.id != peer_id);
            (roster.lobby_peers.len() != before).then(|| roster.lobby_peers.clone())
        };

        match snapshot {
            Some(lobby_peers) => {
                self.events.emit(RoomEvent::LobbyPeersUpdated(lobby_peers));
            }
            None => debug!(peer_id = %peer_id, "Lobby removal for unknown peer"),
        }
    }

    fn patch_lobby_peer(&self, patch: &LobbyPeerPatch) {
        let snapshot = {
            let mut roster = self.roster.write();
            match roster.lobby_peers.iter_mut().find(|p| p.id == patch.peer_id) {
                Some(peer) => {
                    peer.apply(patch);
                    Some(roster.lobby_peers.clone())
                }
                None => None,
            }
        };

        match snapshot {
            Some(lobby_peers) => {
                self.events.emit(RoomEvent::LobbyPeersUpdated(lobby_peers));
            }
            None => debug!(peer_id = %patch.peer_id, "Update for unknown lobby peer"),
        }
    }
}

async fn drain_notifications(mut subscription: EventStream<ChannelEvent>, inner: Weak<RoomInner>) {
    while let Some(event) = subscription.next().await {
        let ChannelEvent::Notification(notification) = event else {
            continue;
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if let Err(e) = inner.handle_notification(&notification) {
            error!(method = %notification.method, error = %e, "Error handling room notification");
        }
    }
}
