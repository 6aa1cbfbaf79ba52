//! Single-queue session actor.
//!
//! [`SessionHandle::spawn`] moves a [`SessionController`] into its own task.
//! Commands from any number of handles and transport events are applied one
//! at a time, and a fresh [`SessionStatus`] is published on a watch channel
//! after each step. A leave discards transport events still queued from the
//! channel it left. When the last handle is dropped the actor leaves the
//! channel and stops.

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, warn};

use crate::controller::SessionController;
use crate::errors::{Result, SessionError};
use crate::state::SessionStatus;
use crate::transport::TransportEvent;

const COMMAND_QUEUE_CAPACITY: usize = 32;

enum Command {
    Join(oneshot::Sender<Result<()>>),
    JoinAndSpeak(oneshot::Sender<Result<()>>),
    ToggleMicrophone(oneshot::Sender<Result<bool>>),
    ToggleDeafen(oneshot::Sender<Result<bool>>),
    Leave(oneshot::Sender<()>),
    UserGesture(oneshot::Sender<usize>),
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::JoinAndSpeak(_) => "join_and_speak",
            Self::ToggleMicrophone(_) => "toggle_microphone",
            Self::ToggleDeafen(_) => "toggle_deafen",
            Self::Leave(_) => "leave",
            Self::UserGesture(_) => "user_gesture",
        }
    }
}

/// Cloneable handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SessionStatus>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    /// Start the actor for `controller`.
    pub fn spawn(controller: SessionController) -> Self {
        let (commands, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (status_tx, status) = watch::channel(controller.status());
        let events = controller.events();
        drop(tokio::spawn(run(controller, rx, events, status_tx)));
        Self { commands, status }
    }

    /// Join the voice channel.
    pub async fn join(&self) -> Result<()> {
        self.request(Command::Join).await?
    }

    /// Join if needed, then enable the microphone if it is off.
    pub async fn join_and_speak(&self) -> Result<()> {
        self.request(Command::JoinAndSpeak).await?
    }

    /// Flip the microphone. Returns whether it is now live.
    pub async fn toggle_microphone(&self) -> Result<bool> {
        self.request(Command::ToggleMicrophone).await?
    }

    /// Flip remote playback. Returns whether the session is now deafened.
    pub async fn toggle_deafen(&self) -> Result<bool> {
        self.request(Command::ToggleDeafen).await?
    }

    /// Leave the channel. Never fails.
    pub async fn leave(&self) {
        let _ = self.request(Command::Leave).await;
    }

    /// Retry playback blocked by autoplay policy.
    pub async fn notify_user_gesture(&self) -> usize {
        self.request(Command::UserGesture).await.unwrap_or(0)
    }

    /// Latest published snapshot.
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Watch snapshots as they are published.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// `true` once the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }
}

async fn run(
    mut controller: SessionController,
    mut commands: mpsc::Receiver<Command>,
    mut events: broadcast::Receiver<TransportEvent>,
    status: watch::Sender<SessionStatus>,
) {
    let mut events_open = true;
    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { break };
                metrics::counter!("dexchat_session_commands_total", "command" => command.name())
                    .increment(1);
                let leaving = matches!(command, Command::Leave(_));
                execute(&mut controller, command, &status).await;
                if leaving && events_open {
                    // Events still buffered belong to the channel just left.
                    events = events.resubscribe();
                }
                continue;
            }
            event = events.recv(), if events_open => match event {
                Ok(event) => controller.handle_event(event).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "session fell behind transport events");
                }
                Err(RecvError::Closed) => events_open = false,
            },
        }
        publish(&status, &controller);
    }

    controller.leave().await;
    publish(&status, &controller);
    debug!(room = %controller.config().room, "session actor stopped");
}

/// Apply `command`, publish the resulting snapshot, then reply, so a caller
/// reading [`SessionHandle::status`] after its reply sees the effect.
async fn execute(
    controller: &mut SessionController,
    command: Command,
    status: &watch::Sender<SessionStatus>,
) {
    match command {
        Command::Join(reply) => {
            let result = controller.join().await;
            publish(status, controller);
            let _ = reply.send(result);
        }
        Command::JoinAndSpeak(reply) => {
            let result = controller.join_and_speak().await;
            publish(status, controller);
            let _ = reply.send(result);
        }
        Command::ToggleMicrophone(reply) => {
            let result = controller.toggle_microphone().await;
            publish(status, controller);
            let _ = reply.send(result);
        }
        Command::ToggleDeafen(reply) => {
            let result = controller.toggle_deafen();
            publish(status, controller);
            let _ = reply.send(result);
        }
        Command::Leave(reply) => {
            controller.leave().await;
            publish(status, controller);
            let _ = reply.send(());
        }
        Command::UserGesture(reply) => {
            let retried = controller.user_gesture();
            publish(status, controller);
            let _ = reply.send(retried);
        }
    }
}

fn publish(status: &watch::Sender<SessionStatus>, controller: &SessionController) {
    let _ = status.send_replace(controller.status());
}
