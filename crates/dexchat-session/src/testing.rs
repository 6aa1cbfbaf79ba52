//! In-process transport and token doubles.
//!
//! [`FakeTransport`] records every call, lets tests inject failures and
//! remote-participant events, and tracks open capture tracks so leaks show
//! up as a non-zero [`FakeTransport::open_tracks`].

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dexchat_core::{RoomId, Uid};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::token::{TokenError, TokenRequest, TokenService, TransportCredential};
use crate::transport::{
    AudioTransport, LocalTrack, MediaKind, MicrophoneOptions, TransportError, TransportEvent,
};

/// A recorded transport call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    /// `join`.
    Join {
        /// Application id.
        app_id: String,
        /// Channel.
        channel: RoomId,
        /// Token.
        token: String,
        /// Identity.
        uid: Uid,
    },
    /// `leave`.
    Leave,
    /// `open_microphone`.
    OpenMicrophone(MicrophoneOptions),
    /// `close_microphone`.
    CloseMicrophone(LocalTrack),
    /// `publish`.
    Publish(LocalTrack),
    /// `unpublish`.
    Unpublish(LocalTrack),
    /// `subscribe`.
    Subscribe(Uid),
    /// `set_volume`.
    SetVolume(Uid, u8),
    /// `play`.
    Play(Uid),
    /// `stop`.
    Stop(Uid),
    /// `enable_volume_indicator`.
    EnableVolumeIndicator,
}

#[derive(Default)]
struct Faults {
    join: Option<TransportError>,
    leave: Option<TransportError>,
    open_microphone: Option<TransportError>,
    publish: Option<TransportError>,
    set_volume: bool,
    autoplay_blocked: BTreeSet<Uid>,
    join_delay: Option<Duration>,
}

/// Scriptable [`AudioTransport`].
pub struct FakeTransport {
    calls: Mutex<Vec<Call>>,
    faults: Mutex<Faults>,
    open: Mutex<BTreeSet<LocalTrack>>,
    next_track: AtomicU64,
    events: broadcast::Sender<TransportEvent>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeTransport {
    /// Transport where every call succeeds.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            calls: Mutex::new(Vec::new()),
            faults: Mutex::new(Faults::default()),
            open: Mutex::new(BTreeSet::new()),
            next_track: AtomicU64::new(1),
            events,
        }
    }

    /// Deliver an event to subscribers.
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    /// All calls so far.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Number of recorded calls equal to `call`.
    pub fn count(&self, call: &Call) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Capture tracks opened and not yet closed.
    pub fn open_tracks(&self) -> usize {
        self.open.lock().len()
    }

    /// Make `join` fail with `err`.
    pub fn fail_join(&self, err: Option<TransportError>) {
        self.faults.lock().join = err;
    }

    /// Make `leave` fail with `err`.
    pub fn fail_leave(&self, err: Option<TransportError>) {
        self.faults.lock().leave = err;
    }

    /// Make `open_microphone` fail with `err`.
    pub fn fail_open_microphone(&self, err: Option<TransportError>) {
        self.faults.lock().open_microphone = err;
    }

    /// Make `publish` fail with `err`.
    pub fn fail_publish(&self, err: Option<TransportError>) {
        self.faults.lock().publish = err;
    }

    /// Make `set_volume` fail for every participant.
    pub fn fail_set_volume(&self, fail: bool) {
        self.faults.lock().set_volume = fail;
    }

    /// Block or unblock autoplay for `uid`.
    pub fn block_autoplay(&self, uid: Uid, blocked: bool) {
        let mut faults = self.faults.lock();
        if blocked {
            let _ = faults.autoplay_blocked.insert(uid);
        } else {
            let _ = faults.autoplay_blocked.remove(&uid);
        }
    }

    /// Delay `join` completion.
    pub fn set_join_delay(&self, delay: Option<Duration>) {
        self.faults.lock().join_delay = delay;
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl AudioTransport for FakeTransport {
    async fn join(
        &self,
        app_id: &str,
        channel: &RoomId,
        token: &str,
        uid: Uid,
    ) -> Result<(), TransportError> {
        self.record(Call::Join {
            app_id: app_id.to_owned(),
            channel: channel.clone(),
            token: token.to_owned(),
            uid,
        });
        let (delay, fault) = {
            let faults = self.faults.lock();
            (faults.join_delay, faults.join.clone())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        fault.map_or(Ok(()), Err)
    }

    async fn leave(&self) -> Result<(), TransportError> {
        self.record(Call::Leave);
        let fault = self.faults.lock().leave.clone();
        fault.map_or(Ok(()), Err)
    }

    async fn open_microphone(
        &self,
        options: MicrophoneOptions,
    ) -> Result<LocalTrack, TransportError> {
        self.record(Call::OpenMicrophone(options));
        if let Some(err) = self.faults.lock().open_microphone.clone() {
            return Err(err);
        }
        let track = LocalTrack(self.next_track.fetch_add(1, Ordering::SeqCst));
        let _ = self.open.lock().insert(track);
        Ok(track)
    }

    fn close_microphone(&self, track: LocalTrack) {
        self.record(Call::CloseMicrophone(track));
        let _ = self.open.lock().remove(&track);
    }

    async fn publish(&self, track: LocalTrack) -> Result<(), TransportError> {
        self.record(Call::Publish(track));
        let fault = self.faults.lock().publish.clone();
        fault.map_or(Ok(()), Err)
    }

    async fn unpublish(&self, track: LocalTrack) -> Result<(), TransportError> {
        self.record(Call::Unpublish(track));
        Ok(())
    }

    async fn subscribe(&self, uid: Uid, _kind: MediaKind) -> Result<(), TransportError> {
        self.record(Call::Subscribe(uid));
        Ok(())
    }

    fn set_volume(&self, uid: Uid, volume: u8) -> Result<(), TransportError> {
        self.record(Call::SetVolume(uid, volume));
        if self.faults.lock().set_volume {
            return Err(TransportError::DeviceUnavailable("volume control".into()));
        }
        Ok(())
    }

    fn play(&self, uid: Uid) -> Result<(), TransportError> {
        self.record(Call::Play(uid));
        if self.faults.lock().autoplay_blocked.contains(&uid) {
            return Err(TransportError::AutoplayBlocked);
        }
        Ok(())
    }

    fn stop(&self, uid: Uid) {
        self.record(Call::Stop(uid));
    }

    fn enable_volume_indicator(&self) {
        self.record(Call::EnableVolumeIndicator);
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

/// [`TokenService`] that always returns the same credential.
#[derive(Clone, Debug)]
pub struct StaticTokenService {
    credential: TransportCredential,
}

impl StaticTokenService {
    /// Issue `token` for `app_id`.
    pub fn new(app_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            credential: TransportCredential {
                token: token.into(),
                transport_app_id: app_id.into(),
                expires_at: None,
            },
        }
    }
}

#[async_trait]
impl TokenService for StaticTokenService {
    async fn issue(&self, _request: &TokenRequest) -> Result<TransportCredential, TokenError> {
        Ok(self.credential.clone())
    }
}
