//! Control-surface panel state and periodic status polling.
//!
//! [`StatusPoller`] asks the bridge for the session snapshot on a fixed
//! interval, optionally looks up the room's active count, and publishes a
//! [`PanelState`] on a watch channel. Faults show up as a [`Notice`] that
//! expires after the configured time-to-live. The task stops when the poller
//! is dropped or stopped.

use std::sync::Arc;
use std::time::Duration;

use dexchat_core::{ErrorKind, RoomId, Tier};
use dexchat_registry::RoomDirectory;
use dexchat_settings::PollSettings;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bridge::{BridgeReply, ControlBridge};
use crate::command::ControlStatus;

/// Transient fault message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    /// Text shown to the user.
    pub message: String,
    /// Classification.
    pub kind: ErrorKind,
    /// When the notice stops being shown.
    pub expires_at: Instant,
}

/// What the control surface renders.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PanelState {
    /// Latest session snapshot.
    pub status: Option<ControlStatus>,
    /// Why no session is available, when none is.
    pub unavailable: Option<String>,
    /// The page is still setting up its session.
    pub initializing: bool,
    /// Active members reported by the room directory.
    pub active_count: Option<u64>,
    /// Tier from the last snapshot; `free` until one arrives.
    pub tier: Tier,
    /// Current fault notice.
    pub notice: Option<Notice>,
}

impl PanelState {
    /// Apply a bridge outcome.
    pub fn apply(&mut self, outcome: &Result<BridgeReply, crate::BridgeError>, notice_ttl: Duration) {
        match outcome {
            Ok(BridgeReply::Status(status)) => {
                self.tier = status.tier;
                self.status = Some(status.clone());
                self.unavailable = None;
                self.initializing = false;
            }
            Ok(BridgeReply::NotAvailable { reason }) => {
                self.status = None;
                self.unavailable = Some(reason.clone());
                self.initializing = false;
            }
            Ok(BridgeReply::StillInitializing) => self.initializing = true,
            Err(err) => self.raise(err.to_string(), err.kind(), notice_ttl),
        }
    }

    /// Show `message` until `ttl` from now.
    pub fn raise(&mut self, message: impl Into<String>, kind: ErrorKind, ttl: Duration) {
        self.notice = Some(Notice {
            message: message.into(),
            kind,
            expires_at: Instant::now() + ttl,
        });
    }

    /// Drop an expired notice. Returns whether one was dropped.
    pub fn expire_notice(&mut self, now: Instant) -> bool {
        if self.notice.as_ref().is_some_and(|n| n.expires_at <= now) {
            self.notice = None;
            return true;
        }
        false
    }
}

/// Room whose active count the panel shows.
pub struct RoomSource {
    /// Directory to query.
    pub directory: Arc<dyn RoomDirectory>,
    /// Room.
    pub room: RoomId,
}

/// Background status poller.
pub struct StatusPoller {
    state: Arc<watch::Sender<PanelState>>,
    notice_ttl: Duration,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl StatusPoller {
    /// Start polling `bridge` every `settings.interval_ms`.
    pub fn start(
        bridge: Arc<ControlBridge>,
        room: Option<RoomSource>,
        settings: &PollSettings,
    ) -> Self {
        let (tx, _) = watch::channel(PanelState::default());
        let state = Arc::new(tx);
        let cancel = CancellationToken::new();
        let interval = Duration::from_millis(settings.interval_ms.max(1));
        let notice_ttl = Duration::from_millis(settings.notice_ttl_ms);

        let task = tokio::spawn(poll_loop(
            bridge,
            room,
            Arc::clone(&state),
            cancel.clone(),
            interval,
            notice_ttl,
        ));

        Self {
            state,
            notice_ttl,
            cancel,
            task: Some(task),
        }
    }

    /// Latest panel state.
    pub fn state(&self) -> PanelState {
        self.state.borrow().clone()
    }

    /// Watch panel updates.
    pub fn subscribe(&self) -> watch::Receiver<PanelState> {
        self.state.subscribe()
    }

    /// Fold the outcome of a user action into the panel.
    pub fn record(&self, outcome: &Result<BridgeReply, crate::BridgeError>) {
        let ttl = self.notice_ttl;
        self.state.send_modify(|s| s.apply(outcome, ttl));
    }

    /// Stop polling and wait for the task to end.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn poll_loop(
    bridge: Arc<ControlBridge>,
    room: Option<RoomSource>,
    state: Arc<watch::Sender<PanelState>>,
    cancel: CancellationToken,
    interval: Duration,
    notice_ttl: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut notice_check = tokio::time::interval(Duration::from_millis(250));
    notice_check.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let (outcome, active) = tokio::select! {
                    () = cancel.cancelled() => break,
                    polled = poll_once(&bridge, room.as_ref()) => polled,
                };
                state.send_modify(|s| {
                    s.apply(&outcome, notice_ttl);
                    if active.is_some() {
                        s.active_count = active;
                    }
                });
            }
            _ = notice_check.tick() => {
                let now = Instant::now();
                let _ = state.send_if_modified(|s| s.expire_notice(now));
            }
        }
    }
    debug!("status poller stopped");
}

async fn poll_once(
    bridge: &ControlBridge,
    room: Option<&RoomSource>,
) -> (Result<BridgeReply, crate::BridgeError>, Option<u64>) {
    let outcome = bridge.status().await;
    if let Err(err) = &outcome {
        warn!(error = %err, "status poll failed");
    }
    let active = match room {
        Some(source) => match source.directory.room_info(&source.room).await {
            Ok(info) => Some(info.active_count),
            Err(err) => {
                debug!(room = %source.room, error = %err, "room info unavailable");
                None
            }
        },
        None => None,
    };
    (outcome, active)
}
