//! Control-surface side of the bridge.
//!
//! Each logical command gets one idempotency key, reused across up to
//! `max_attempts` deliveries with a linearly growing pause between them.
//! When every attempt fails the bridge probes `check-initialization`; a page
//! that is still setting up yields [`BridgeReply::StillInitializing`] rather
//! than an error.

use std::sync::Arc;

use dexchat_core::RetryConfig;
use tracing::{debug, instrument, warn};

use crate::channel::ControlChannel;
use crate::command::{ControlCommand, ControlEnvelope, ControlReply, ControlStatus};
use crate::errors::{BridgeError, DeliveryError};

/// Outcome of a delivered command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BridgeReply {
    /// Session snapshot after the command.
    Status(ControlStatus),
    /// No session on the page.
    NotAvailable {
        /// Why.
        reason: String,
    },
    /// Deliveries failed while the page was still initializing.
    StillInitializing,
}

/// Retrying command sender.
pub struct ControlBridge {
    channel: Arc<dyn ControlChannel>,
    retry: RetryConfig,
}

impl ControlBridge {
    /// Bridge over `channel`.
    pub fn new(channel: Arc<dyn ControlChannel>, retry: RetryConfig) -> Self {
        Self { channel, retry }
    }

    /// Read the session snapshot.
    pub async fn status(&self) -> Result<BridgeReply, BridgeError> {
        self.send(ControlCommand::GetStatus).await
    }

    /// Join and enable the microphone.
    pub async fn join(&self) -> Result<BridgeReply, BridgeError> {
        self.send(ControlCommand::Join).await
    }

    /// Flip the microphone.
    pub async fn toggle_mute(&self) -> Result<BridgeReply, BridgeError> {
        self.send(ControlCommand::ToggleMicrophone).await
    }

    /// Flip remote playback.
    pub async fn toggle_deafen(&self) -> Result<BridgeReply, BridgeError> {
        self.send(ControlCommand::ToggleDeafen).await
    }

    /// Leave the channel.
    pub async fn leave(&self) -> Result<BridgeReply, BridgeError> {
        self.send(ControlCommand::Leave).await
    }

    /// Deliver `command` with retries.
    #[instrument(skip(self), fields(command = command.as_str()))]
    pub async fn send(&self, command: ControlCommand) -> Result<BridgeReply, BridgeError> {
        let envelope = ControlEnvelope::new(command);
        let attempts = self.retry.max_attempts.max(1);
        let mut last = DeliveryError::Disconnected;

        for attempt in 1..=attempts {
            match self.channel.deliver(&envelope).await {
                Ok(reply) => {
                    debug!(attempt, "command delivered");
                    return into_result(reply);
                }
                Err(err) => {
                    warn!(attempt, error = %err, "control delivery failed");
                    last = err;
                    if attempt < attempts {
                        metrics::counter!("dexchat_bridge_retries_total", "command" => command.as_str())
                            .increment(1);
                        tokio::time::sleep(self.retry.delay_after(attempt)).await;
                    }
                }
            }
        }

        if self.still_initializing().await {
            debug!("page still initializing");
            return Ok(BridgeReply::StillInitializing);
        }
        Err(BridgeError::Unreachable {
            command: command.as_str(),
            attempts,
            last,
        })
    }

    async fn still_initializing(&self) -> bool {
        let probe = ControlEnvelope::new(ControlCommand::CheckInitialization);
        matches!(
            self.channel.deliver(&probe).await,
            Ok(ControlReply::Initialization { initializing: true })
        )
    }
}

fn into_result(reply: ControlReply) -> Result<BridgeReply, BridgeError> {
    match reply {
        ControlReply::Status { status } => Ok(BridgeReply::Status(status)),
        ControlReply::NotAvailable { reason } => Ok(BridgeReply::NotAvailable { reason }),
        ControlReply::Initialization { initializing: true } => Ok(BridgeReply::StillInitializing),
        ControlReply::Initialization { initializing: false } => Ok(BridgeReply::NotAvailable {
            reason: "unexpected initialization reply".into(),
        }),
        ControlReply::Failed { error, message } => Err(BridgeError::Command {
            kind: error,
            message,
        }),
    }
}
