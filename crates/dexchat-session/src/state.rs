//! Session state and published snapshots.

use std::collections::BTreeMap;

use dexchat_core::{RoomId, Tier, Uid};
use serde::{Deserialize, Serialize};

/// Level above which a participant counts as speaking.
pub const DEFAULT_SPEAKING_THRESHOLD: f32 = 0.06;

/// Connection lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No channel joined.
    #[default]
    Disconnected,
    /// Credential requested or transport join in flight.
    Connecting,
    /// Joined.
    Connected,
}

/// Playback state of one remote participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Playback {
    /// Known but not publishing audio.
    Idle,
    /// Subscribed and playing.
    Playing,
    /// Autoplay blocked; retried on the next user gesture.
    Deferred,
    /// Muted because the local user is deafened.
    Muted,
    /// Deferred retry failed.
    Failed,
}

/// Remote participant bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RemoteParticipant {
    /// Identity.
    pub uid: Uid,
    /// Whether the participant publishes audio.
    pub publishing: bool,
    /// Playback state.
    pub playback: Playback,
}

impl RemoteParticipant {
    pub(crate) fn new(uid: Uid) -> Self {
        Self {
            uid,
            publishing: false,
            playback: Playback::Idle,
        }
    }
}

/// Point-in-time view of a session.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    /// Lifecycle state.
    pub state: SessionState,
    /// Local capture live.
    pub microphone_enabled: bool,
    /// Remote playback muted.
    pub deafened: bool,
    /// Number of known remote participants.
    pub remote_count: usize,
    /// Participants including the local user when connected.
    pub user_count: usize,
    /// Membership tier.
    pub tier: Tier,
    /// Local identity.
    pub uid: Uid,
    /// Room.
    pub room: RoomId,
    /// Identities currently above the speaking threshold.
    pub speaking: Vec<Uid>,
    /// Some remote playback waits for a user gesture.
    pub awaiting_gesture: bool,
    /// Last reported audio levels.
    #[serde(skip)]
    pub levels: BTreeMap<Uid, f32>,
}

impl SessionStatus {
    /// Initial snapshot for a fresh session.
    #[must_use]
    pub fn disconnected(room: RoomId, uid: Uid, tier: Tier) -> Self {
        Self {
            state: SessionState::Disconnected,
            microphone_enabled: false,
            deafened: false,
            remote_count: 0,
            user_count: 0,
            tier,
            uid,
            room,
            speaking: Vec::new(),
            awaiting_gesture: false,
            levels: BTreeMap::new(),
        }
    }

    /// `true` when joined.
    #[must_use]
    pub fn connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// `true` when the local microphone is off.
    #[must_use]
    pub fn muted(&self) -> bool {
        !self.microphone_enabled
    }
}
