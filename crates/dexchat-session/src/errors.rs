//! Session error types.

use dexchat_core::ErrorKind;
use thiserror::Error;

use crate::state::SessionState;
use crate::token::TokenError;
use crate::transport::TransportError;

/// Errors returned by session commands.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Credential issuance failed.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// The transport rejected an operation.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Command issued in the wrong state.
    #[error("{operation} requires a connected session (state: {state:?})")]
    InvalidState {
        /// Rejected command.
        operation: &'static str,
        /// State at the time.
        state: SessionState,
    },

    /// The session actor has stopped.
    #[error("session closed")]
    Closed,
}

impl SessionError {
    /// Shared classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Token(e) => e.kind(),
            Self::Transport(e) => e.kind(),
            Self::InvalidState { .. } | Self::Closed => ErrorKind::InvalidState,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, SessionError>;
