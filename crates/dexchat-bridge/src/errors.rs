//! Bridge error types.

use std::time::Duration;

use dexchat_core::ErrorKind;
use thiserror::Error;

/// A single delivery attempt failed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// Nothing is listening on the page side.
    #[error("page endpoint not reachable")]
    Disconnected,
    /// No reply within the delivery timeout.
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    /// The page side dropped the request.
    #[error("delivery failed: {0}")]
    Failed(String),
}

/// Errors returned by [`crate::ControlBridge`].
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Every attempt failed and the page is not initializing.
    #[error("command {command} undeliverable after {attempts} attempts: {last}")]
    Unreachable {
        /// Command wire name.
        command: &'static str,
        /// Attempts made.
        attempts: u32,
        /// Last delivery failure.
        #[source]
        last: DeliveryError,
    },

    /// The session rejected the command.
    #[error("{message}")]
    Command {
        /// Classification reported by the page.
        kind: ErrorKind,
        /// Message reported by the page.
        message: String,
    },
}

impl BridgeError {
    /// Shared classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unreachable { .. } => ErrorKind::TransientNetwork,
            Self::Command { kind, .. } => *kind,
        }
    }
}

/// Billing client failures.
#[derive(Debug, Error)]
pub enum BillingError {
    /// Request rejected before sending.
    #[error("invalid billing request: {0}")]
    Invalid(String),
    /// Non-success response.
    #[error("billing service returned {status}: {body}")]
    Status {
        /// HTTP status.
        status: u16,
        /// Truncated body.
        body: String,
    },
    /// Transport-level HTTP failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl BillingError {
    /// Shared classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Invalid(_) => ErrorKind::Validation,
            Self::Status { status: 404, .. } => ErrorKind::NotFound,
            Self::Status { status, .. } if (400..500).contains(status) => ErrorKind::Validation,
            Self::Status { .. } | Self::Http(_) => ErrorKind::TransientNetwork,
        }
    }
}
