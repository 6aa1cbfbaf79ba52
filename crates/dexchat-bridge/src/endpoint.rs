//! Page-side command endpoint.
//!
//! The endpoint owns the page's session capability. The runtime hands it a
//! [`SessionHandle`] with [`PageEndpoint::attach`] once the session exists and
//! takes it back with [`PageEndpoint::detach`]; without one every command is
//! answered with [`ControlReply::NotAvailable`].
//!
//! Mutating commands are deduplicated by idempotency key: the reply to the
//! first delivery is cached and replayed for repeats. Mutations run one at a
//! time, so a repeat that arrives while the original is still executing
//! waits for it and then replays.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use dexchat_core::IdempotencyKey;
use dexchat_session::SessionHandle;
use parking_lot::RwLock;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::channel::Delivery;
use crate::command::{ControlCommand, ControlEnvelope, ControlReply, ControlStatus};

/// Default replay cache size.
pub const DEFAULT_REPLAY_CAPACITY: usize = 32;

/// Reason reported before a session has ever been attached.
pub const REASON_NO_SESSION: &str = "no voice session on this page";

#[derive(Clone, Debug)]
enum Availability {
    Ready(SessionHandle),
    Initializing,
    Unavailable(String),
}

/// Bounded key → reply memory, evicting oldest first.
#[derive(Debug)]
struct ReplayCache {
    capacity: usize,
    order: VecDeque<IdempotencyKey>,
    replies: HashMap<IdempotencyKey, ControlReply>,
}

impl ReplayCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            replies: HashMap::new(),
        }
    }

    fn get(&self, key: &IdempotencyKey) -> Option<ControlReply> {
        self.replies.get(key).cloned()
    }

    fn insert(&mut self, key: IdempotencyKey, reply: ControlReply) {
        if self.replies.insert(key.clone(), reply).is_some() {
            return;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                let _ = self.replies.remove(&oldest);
            }
        }
    }

    fn clear(&mut self) {
        self.order.clear();
        self.replies.clear();
    }

    fn len(&self) -> usize {
        self.replies.len()
    }
}

/// Page-side handler for control commands.
#[derive(Debug)]
pub struct PageEndpoint {
    availability: RwLock<Availability>,
    replay: Mutex<ReplayCache>,
}

impl Default for PageEndpoint {
    fn default() -> Self {
        Self::new(DEFAULT_REPLAY_CAPACITY)
    }
}

impl PageEndpoint {
    /// Endpoint remembering up to `replay_capacity` replies.
    pub fn new(replay_capacity: usize) -> Self {
        Self {
            availability: RwLock::new(Availability::Unavailable(REASON_NO_SESSION.into())),
            replay: Mutex::new(ReplayCache::new(replay_capacity)),
        }
    }

    /// Mark the page as setting up its session.
    pub fn begin_initialization(&self) {
        *self.availability.write() = Availability::Initializing;
    }

    /// Hand the session capability to the endpoint.
    pub fn attach(&self, session: SessionHandle) {
        *self.availability.write() = Availability::Ready(session);
    }

    /// Take the session capability back, reporting `reason` from now on.
    pub fn detach(&self, reason: impl Into<String>) -> Option<SessionHandle> {
        let previous =
            std::mem::replace(&mut *self.availability.write(), Availability::Unavailable(reason.into()));
        match previous {
            Availability::Ready(session) => Some(session),
            Availability::Initializing | Availability::Unavailable(_) => None,
        }
    }

    /// Whether a session is attached.
    pub fn is_attached(&self) -> bool {
        matches!(*self.availability.read(), Availability::Ready(_))
    }

    /// Forget cached replies. Called when the page's session changes.
    pub async fn clear_replay(&self) {
        self.replay.lock().await.clear();
    }

    /// Number of cached replies.
    pub async fn replay_len(&self) -> usize {
        self.replay.lock().await.len()
    }

    /// Answer one envelope.
    #[instrument(skip_all, fields(command = envelope.command.as_str()))]
    pub async fn handle(&self, envelope: ControlEnvelope) -> ControlReply {
        if envelope.command == ControlCommand::CheckInitialization {
            let initializing = matches!(*self.availability.read(), Availability::Initializing);
            return ControlReply::Initialization { initializing };
        }
        if !envelope.command.mutates() {
            return self.dispatch(envelope.command).await;
        }

        let mut replay = self.replay.lock().await;
        if let Some(reply) = replay.get(&envelope.idempotency_key) {
            debug!(key = envelope.idempotency_key.as_str(), "replaying cached reply");
            metrics::counter!("dexchat_bridge_replays_total").increment(1);
            return reply;
        }
        let reply = self.dispatch(envelope.command).await;
        replay.insert(envelope.idempotency_key, reply.clone());
        reply
    }

    /// Serve deliveries until the channel closes or `cancel` fires.
    pub async fn serve(self: Arc<Self>, mut rx: mpsc::Receiver<Delivery>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                delivery = rx.recv() => {
                    let Some(delivery) = delivery else { break };
                    let endpoint = Arc::clone(&self);
                    drop(tokio::spawn(async move {
                        let reply = endpoint.handle(delivery.envelope.clone()).await;
                        delivery.respond(reply);
                    }));
                }
            }
        }
        debug!("page endpoint stopped");
    }

    async fn dispatch(&self, command: ControlCommand) -> ControlReply {
        let session = match &*self.availability.read() {
            Availability::Ready(session) => session.clone(),
            Availability::Initializing => {
                return ControlReply::NotAvailable {
                    reason: "voice session is initializing".into(),
                };
            }
            Availability::Unavailable(reason) => {
                return ControlReply::NotAvailable {
                    reason: reason.clone(),
                };
            }
        };

        let result = match command {
            ControlCommand::GetStatus | ControlCommand::CheckInitialization => Ok(()),
            ControlCommand::Join => session.join_and_speak().await,
            ControlCommand::ToggleMicrophone => session.toggle_microphone().await.map(|_| ()),
            ControlCommand::ToggleDeafen => session.toggle_deafen().await.map(|_| ()),
            ControlCommand::Leave => {
                session.leave().await;
                Ok(())
            }
        };
        match result {
            Ok(()) => ControlReply::Status {
                status: ControlStatus::from(&session.status()),
            },
            Err(err) => ControlReply::Failed {
                error: err.kind(),
                message: err.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ControlChannel;
    use dexchat_core::{ErrorKind, RoomId, Tier, Uid};
    use dexchat_session::testing::{Call, FakeTransport, StaticTokenService};
    use dexchat_session::{SessionConfig, SessionController};

    fn session(fake: &Arc<FakeTransport>) -> SessionHandle {
        SessionHandle::spawn(SessionController::new(
            fake.clone(),
            Arc::new(StaticTokenService::new("app", "tok")),
            SessionConfig::new(
                RoomId::parse("abc123").unwrap(),
                Uid::new(9).unwrap(),
                Tier::Basic,
            ),
        ))
    }

    fn envelope(command: ControlCommand, key: &str) -> ControlEnvelope {
        ControlEnvelope {
            idempotency_key: IdempotencyKey::from(key),
            command,
        }
    }

    // -- availability --

    #[tokio::test]
    async fn without_session_everything_is_not_available() {
        let endpoint = PageEndpoint::default();
        for command in [
            ControlCommand::GetStatus,
            ControlCommand::Join,
            ControlCommand::ToggleMicrophone,
            ControlCommand::ToggleDeafen,
            ControlCommand::Leave,
        ] {
            let reply = endpoint.handle(envelope(command, command.as_str())).await;
            assert_eq!(
                reply,
                ControlReply::NotAvailable {
                    reason: REASON_NO_SESSION.into()
                }
            );
        }
    }

    #[tokio::test]
    async fn initialization_probe() {
        let endpoint = PageEndpoint::default();
        let probe = || envelope(ControlCommand::CheckInitialization, "p");
        assert_eq!(
            endpoint.handle(probe()).await,
            ControlReply::Initialization { initializing: false }
        );
        endpoint.begin_initialization();
        assert_eq!(
            endpoint.handle(probe()).await,
            ControlReply::Initialization { initializing: true }
        );
    }

    #[tokio::test]
    async fn detach_returns_capability() {
        let fake = Arc::new(FakeTransport::new());
        let endpoint = PageEndpoint::default();
        endpoint.attach(session(&fake));
        assert!(endpoint.is_attached());
        assert!(endpoint.detach("room full").is_some());
        assert!(endpoint.detach("room full").is_none());
        let reply = endpoint.handle(envelope(ControlCommand::GetStatus, "s")).await;
        assert_eq!(
            reply,
            ControlReply::NotAvailable {
                reason: "room full".into()
            }
        );
    }

    // -- commands --

    #[tokio::test]
    async fn join_means_join_and_speak() {
        let fake = Arc::new(FakeTransport::new());
        let endpoint = PageEndpoint::default();
        endpoint.attach(session(&fake));

        let reply = endpoint.handle(envelope(ControlCommand::Join, "j1")).await;
        let ControlReply::Status { status } = reply else {
            panic!("unexpected reply: {reply:?}");
        };
        assert!(status.connected);
        assert!(!status.muted);
        assert_eq!(status.user_count, 1);
        assert_eq!(fake.open_tracks(), 1);
    }

    #[tokio::test]
    async fn repeated_key_replays_without_side_effects() {
        let fake = Arc::new(FakeTransport::new());
        let endpoint = PageEndpoint::default();
        endpoint.attach(session(&fake));
        let _ = endpoint.handle(envelope(ControlCommand::Join, "j")).await;

        let first = endpoint
            .handle(envelope(ControlCommand::ToggleMicrophone, "m"))
            .await;
        let second = endpoint
            .handle(envelope(ControlCommand::ToggleMicrophone, "m"))
            .await;
        assert_eq!(first, second);
        assert_eq!(fake.count(&Call::Unpublish(dexchat_session::LocalTrack(1))), 1);
        assert_eq!(fake.open_tracks(), 0);
    }

    #[tokio::test]
    async fn session_errors_become_failed_replies() {
        let fake = Arc::new(FakeTransport::new());
        let endpoint = PageEndpoint::default();
        endpoint.attach(session(&fake));
        let reply = endpoint
            .handle(envelope(ControlCommand::ToggleDeafen, "d"))
            .await;
        assert!(matches!(
            reply,
            ControlReply::Failed {
                error: ErrorKind::InvalidState,
                ..
            }
        ));
    }

    // -- replay cache --

    #[test]
    fn replay_cache_is_bounded() {
        let mut cache = ReplayCache::new(2);
        let reply = ControlReply::Initialization { initializing: false };
        cache.insert("a".into(), reply.clone());
        cache.insert("b".into(), reply.clone());
        cache.insert("c".into(), reply.clone());
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&"a".into()).is_none());
        assert!(cache.get(&"c".into()).is_some());
    }

    #[tokio::test]
    async fn serve_answers_deliveries() {
        let endpoint = Arc::new(PageEndpoint::default());
        let (channel, rx) = crate::channel::local_channel(4, std::time::Duration::from_secs(1));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&endpoint).serve(rx, cancel.clone()));

        let reply = channel
            .deliver(&ControlEnvelope::new(ControlCommand::CheckInitialization))
            .await
            .unwrap();
        assert_eq!(reply, ControlReply::Initialization { initializing: false });

        cancel.cancel();
        task.await.unwrap();
    }
}
