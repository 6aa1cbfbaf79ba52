//! Voice session state machine.
//!
//! `disconnected --join--> connecting --transport ready--> connected`, and
//! back to `disconnected` on leave, transport loss or a failed join. Every
//! return to `disconnected` goes through [`SessionController::reset`], which
//! drops the microphone guard and clears all flags and remote bookkeeping.
//!
//! The controller takes `&mut self` everywhere; serialization of concurrent
//! callers is the job of [`crate::handle::SessionHandle`].

use std::collections::BTreeMap;
use std::sync::Arc;

use dexchat_core::{RoomId, Tier, Uid};
use dexchat_settings::SessionSettings;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::errors::{Result, SessionError};
use crate::microphone::MicrophoneGuard;
use crate::state::{
    DEFAULT_SPEAKING_THRESHOLD, Playback, RemoteParticipant, SessionState, SessionStatus,
};
use crate::token::{TokenRequest, TokenService, TransportRole};
use crate::transport::{
    AudioTransport, LinkState, MediaKind, MicrophoneOptions, TransportError, TransportEvent,
};

const FULL_VOLUME: u8 = 100;

/// Fixed parameters of one session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Voice channel.
    pub room: RoomId,
    /// Local identity.
    pub uid: Uid,
    /// Membership tier, reported in status.
    pub tier: Tier,
    /// Capture options.
    pub microphone: MicrophoneOptions,
    /// Level above which a participant counts as speaking.
    pub speaking_threshold: f32,
}

impl SessionConfig {
    /// Config with default capture options.
    pub fn new(room: RoomId, uid: Uid, tier: Tier) -> Self {
        Self {
            room,
            uid,
            tier,
            microphone: MicrophoneOptions::default(),
            speaking_threshold: DEFAULT_SPEAKING_THRESHOLD,
        }
    }

    /// Apply capture options and speaking threshold from settings.
    #[must_use]
    pub fn with_settings(mut self, settings: &SessionSettings) -> Self {
        self.microphone = MicrophoneOptions {
            echo_cancellation: settings.echo_cancellation,
            noise_suppression: settings.noise_suppression,
        };
        self.speaking_threshold = settings.speaking_threshold;
        self
    }
}

/// Drives an [`AudioTransport`] for one room and identity.
pub struct SessionController {
    transport: Arc<dyn AudioTransport>,
    tokens: Arc<dyn TokenService>,
    config: SessionConfig,
    state: SessionState,
    microphone: Option<MicrophoneGuard>,
    deafened: bool,
    remotes: BTreeMap<Uid, RemoteParticipant>,
    levels: BTreeMap<Uid, f32>,
}

impl SessionController {
    /// New disconnected session.
    pub fn new(
        transport: Arc<dyn AudioTransport>,
        tokens: Arc<dyn TokenService>,
        config: SessionConfig,
    ) -> Self {
        Self {
            transport,
            tokens,
            config,
            state: SessionState::Disconnected,
            microphone: None,
            deafened: false,
            remotes: BTreeMap::new(),
            levels: BTreeMap::new(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Session parameters.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Receiver for transport events.
    pub fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.transport.events()
    }

    /// Join the room's voice channel. No-op when already connected.
    #[instrument(skip(self), fields(room = %self.config.room, uid = %self.config.uid))]
    pub async fn join(&mut self) -> Result<()> {
        if self.state == SessionState::Connected {
            return Ok(());
        }
        self.state = SessionState::Connecting;
        match self.connect().await {
            Ok(()) => {
                self.state = SessionState::Connected;
                info!("joined voice channel");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, kind = %err.kind(), "join failed");
                self.reset();
                Err(err)
            }
        }
    }

    async fn connect(&mut self) -> Result<()> {
        let request = TokenRequest {
            room_id: self.config.room.clone(),
            identity: self.config.uid,
            role: TransportRole::Publisher,
        };
        let credential = self.tokens.issue(&request).await?;
        self.transport
            .join(
                &credential.transport_app_id,
                &self.config.room,
                &credential.token,
                self.config.uid,
            )
            .await?;
        self.transport.enable_volume_indicator();
        Ok(())
    }

    /// Join, then make sure the microphone is live.
    pub async fn join_and_speak(&mut self) -> Result<()> {
        self.join().await?;
        if self.microphone.is_none() {
            let _ = self.toggle_microphone().await?;
        }
        Ok(())
    }

    /// Flip local capture. Returns whether the microphone is now live.
    #[instrument(skip(self), fields(room = %self.config.room, uid = %self.config.uid))]
    pub async fn toggle_microphone(&mut self) -> Result<bool> {
        self.require_connected("toggle_microphone")?;

        if let Some(guard) = self.microphone.take() {
            if let Err(err) = self.transport.unpublish(guard.track()).await {
                warn!(error = %err, "unpublish failed, releasing capture anyway");
            }
            drop(guard);
            let _ = self.levels.remove(&self.config.uid);
            debug!("microphone off");
            return Ok(false);
        }

        let track = self.transport.open_microphone(self.config.microphone).await?;
        let guard = MicrophoneGuard::new(Arc::clone(&self.transport), track);
        self.transport.publish(guard.track()).await?;
        self.microphone = Some(guard);
        debug!("microphone on");
        Ok(true)
    }

    /// Flip remote playback. Returns whether the session is now deafened.
    pub fn toggle_deafen(&mut self) -> Result<bool> {
        self.require_connected("toggle_deafen")?;
        self.deafened = !self.deafened;
        let known: Vec<Uid> = self.remotes.keys().copied().collect();
        for uid in known {
            if self.deafened {
                self.mute_remote(uid);
            } else {
                self.unmute_remote(uid);
            }
        }
        debug!(deafened = self.deafened, remotes = self.remotes.len(), "deafen toggled");
        Ok(self.deafened)
    }

    /// Leave the channel. Local state is reset even if the transport fails.
    #[instrument(skip(self), fields(room = %self.config.room, uid = %self.config.uid))]
    pub async fn leave(&mut self) {
        drop(self.microphone.take());
        if self.state != SessionState::Disconnected {
            if let Err(err) = self.transport.leave().await {
                warn!(error = %err, "transport leave failed");
            }
            info!("left voice channel");
        }
        self.reset();
    }

    /// Retry playback deferred by autoplay policy. Each deferred participant
    /// is retried exactly once. Returns the number retried.
    pub fn user_gesture(&mut self) -> usize {
        let deferred: Vec<Uid> = self
            .remotes
            .values()
            .filter(|r| r.playback == Playback::Deferred)
            .map(|r| r.uid)
            .collect();
        for &uid in &deferred {
            let playback = match self.transport.play(uid) {
                Ok(()) => Playback::Playing,
                Err(err) => {
                    warn!(remote = %uid, error = %err, "deferred playback failed");
                    Playback::Failed
                }
            };
            self.set_playback(uid, playback);
        }
        deferred.len()
    }

    /// Apply one transport event.
    pub async fn handle_event(&mut self, event: TransportEvent) {
        if self.state != SessionState::Connected {
            return;
        }
        match event {
            TransportEvent::UserJoined(uid) => {
                if uid != self.config.uid {
                    self.track_remote(uid);
                }
            }
            TransportEvent::UserLeft(uid) => {
                let _ = self.remotes.remove(&uid);
                let _ = self.levels.remove(&uid);
            }
            TransportEvent::UserPublished(uid, MediaKind::Audio) => {
                if uid != self.config.uid {
                    self.on_remote_audio(uid).await;
                }
            }
            TransportEvent::UserUnpublished(uid, MediaKind::Audio) => {
                if let Some(remote) = self.remotes.get_mut(&uid) {
                    remote.publishing = false;
                    if remote.playback != Playback::Muted {
                        remote.playback = Playback::Idle;
                    }
                }
                let _ = self.levels.remove(&uid);
            }
            TransportEvent::UserPublished(_, MediaKind::Video)
            | TransportEvent::UserUnpublished(_, MediaKind::Video) => {}
            TransportEvent::VolumeIndicator(batch) => self.merge_levels(batch),
            TransportEvent::ConnectionStateChanged { current, previous } => {
                info!(?current, ?previous, "transport link state changed");
                if current == LinkState::Disconnected {
                    warn!("transport disconnected, resetting session");
                    self.reset();
                }
            }
        }
    }

    /// Snapshot of the current state.
    pub fn status(&self) -> SessionStatus {
        let connected = self.state == SessionState::Connected;
        let speaking = self
            .levels
            .iter()
            .filter(|(_, level)| **level > self.config.speaking_threshold)
            .map(|(uid, _)| *uid)
            .collect();
        SessionStatus {
            state: self.state,
            microphone_enabled: self.microphone.is_some(),
            deafened: self.deafened,
            remote_count: self.remotes.len(),
            user_count: if connected { self.remotes.len() + 1 } else { 0 },
            tier: self.config.tier,
            uid: self.config.uid,
            room: self.config.room.clone(),
            speaking,
            awaiting_gesture: self
                .remotes
                .values()
                .any(|r| r.playback == Playback::Deferred),
            levels: self.levels.clone(),
        }
    }

    /// Known remote participant.
    pub fn remote(&self, uid: Uid) -> Option<RemoteParticipant> {
        self.remotes.get(&uid).copied()
    }

    /// Return to `disconnected` with every flag cleared.
    pub fn reset(&mut self) {
        self.state = SessionState::Disconnected;
        drop(self.microphone.take());
        self.deafened = false;
        self.remotes.clear();
        self.levels.clear();
    }

    fn require_connected(&self, operation: &'static str) -> Result<()> {
        if self.state == SessionState::Connected {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn track_remote(&mut self, uid: Uid) {
        if self.remotes.contains_key(&uid) {
            return;
        }
        let _ = self.remotes.insert(uid, RemoteParticipant::new(uid));
        if self.deafened {
            self.mute_remote(uid);
        }
    }

    async fn on_remote_audio(&mut self, uid: Uid) {
        self.track_remote(uid);
        if let Err(err) = self.transport.subscribe(uid, MediaKind::Audio).await {
            warn!(remote = %uid, error = %err, "subscribe failed");
            return;
        }
        if let Some(remote) = self.remotes.get_mut(&uid) {
            remote.publishing = true;
        }
        if self.deafened {
            self.mute_remote(uid);
        } else {
            let playback = self.start_playback(uid);
            self.set_playback(uid, playback);
        }
    }

    fn start_playback(&self, uid: Uid) -> Playback {
        match self.transport.play(uid) {
            Ok(()) => Playback::Playing,
            Err(TransportError::AutoplayBlocked) => {
                debug!(remote = %uid, "playback deferred until user gesture");
                Playback::Deferred
            }
            Err(err) => {
                warn!(remote = %uid, error = %err, "playback failed");
                Playback::Failed
            }
        }
    }

    fn mute_remote(&mut self, uid: Uid) {
        if let Err(err) = self.transport.set_volume(uid, 0) {
            debug!(remote = %uid, error = %err, "volume control failed, stopping playback");
            self.transport.stop(uid);
        }
        self.set_playback(uid, Playback::Muted);
    }

    fn unmute_remote(&mut self, uid: Uid) {
        let Some(remote) = self.remote(uid) else {
            return;
        };
        if let Err(err) = self.transport.set_volume(uid, FULL_VOLUME) {
            debug!(remote = %uid, error = %err, "volume restore failed");
        }
        let playback = if remote.publishing {
            self.start_playback(uid)
        } else {
            Playback::Idle
        };
        self.set_playback(uid, playback);
    }

    fn set_playback(&mut self, uid: Uid, playback: Playback) {
        if let Some(remote) = self.remotes.get_mut(&uid) {
            remote.playback = playback;
        }
    }

    fn merge_levels(&mut self, batch: Vec<(Uid, f32)>) {
        for (uid, level) in batch {
            if uid == self.config.uid && self.microphone.is_none() {
                continue;
            }
            let level = if level.is_nan() { 0.0 } else { level.clamp(0.0, 1.0) };
            let _ = self.levels.insert(uid, level);
        }
    }
}
