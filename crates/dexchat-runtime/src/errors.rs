//! Runtime error types.

use dexchat_core::ErrorKind;
use dexchat_registry::RegistryError;
use dexchat_session::TokenError;
use thiserror::Error;

/// Errors from page activation and service wiring.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Membership registry failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Credential client construction failed.
    #[error(transparent)]
    Token(#[from] TokenError),
}

impl RuntimeError {
    /// Shared classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Registry(e) => e.kind(),
            Self::Token(e) => e.kind(),
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, RuntimeError>;
