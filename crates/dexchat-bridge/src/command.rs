//! Control wire types.
//!
//! Messages are JSON with a `type` discriminator in kebab-case, matching the
//! control surface's message names (`get-status`, `toggle-microphone`, ...).

use dexchat_core::{ErrorKind, IdempotencyKey, Tier};
use dexchat_session::SessionStatus;
use serde::{Deserialize, Serialize};

/// Command sent from the control surface to a page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlCommand {
    /// Read the session snapshot.
    GetStatus,
    /// Join and speak.
    Join,
    /// Flip the microphone.
    ToggleMicrophone,
    /// Flip remote playback.
    ToggleDeafen,
    /// Leave the channel.
    Leave,
    /// Ask whether the page is still setting up its session.
    CheckInitialization,
}

impl ControlCommand {
    /// Wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GetStatus => "get-status",
            Self::Join => "join",
            Self::ToggleMicrophone => "toggle-microphone",
            Self::ToggleDeafen => "toggle-deafen",
            Self::Leave => "leave",
            Self::CheckInitialization => "check-initialization",
        }
    }

    /// Whether the command changes session state. Only these are replayed
    /// from the idempotency cache.
    #[must_use]
    pub fn mutates(self) -> bool {
        matches!(
            self,
            Self::Join | Self::ToggleMicrophone | Self::ToggleDeafen | Self::Leave
        )
    }
}

/// One logical command plus the key reused across its delivery attempts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlEnvelope {
    /// Idempotency key.
    pub idempotency_key: IdempotencyKey,
    /// Command.
    pub command: ControlCommand,
}

impl ControlEnvelope {
    /// Envelope with a fresh key.
    #[must_use]
    pub fn new(command: ControlCommand) -> Self {
        Self {
            idempotency_key: IdempotencyKey::new(),
            command,
        }
    }
}

/// Session status as the control surface sees it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlStatus {
    /// Joined.
    pub connected: bool,
    /// Microphone off.
    pub muted: bool,
    /// Remote playback muted.
    pub deafened: bool,
    /// Participants including the local user.
    pub user_count: usize,
    /// Membership tier.
    pub tier: Tier,
}

impl From<&SessionStatus> for ControlStatus {
    fn from(status: &SessionStatus) -> Self {
        Self {
            connected: status.connected(),
            muted: status.muted(),
            deafened: status.deafened,
            user_count: status.user_count,
            tier: status.tier,
        }
    }
}

/// Page reply to a delivered command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ControlReply {
    /// Command applied; snapshot afterwards.
    Status {
        /// Snapshot.
        status: ControlStatus,
    },
    /// Answer to `check-initialization`.
    Initialization {
        /// Session setup still running.
        initializing: bool,
    },
    /// No session on the page.
    NotAvailable {
        /// Why.
        reason: String,
    },
    /// The session rejected the command.
    Failed {
        /// Classification.
        error: ErrorKind,
        /// Message.
        message: String,
    },
}
