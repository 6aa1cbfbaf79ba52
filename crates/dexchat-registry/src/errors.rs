//! Registry error types.

use dexchat_core::ErrorKind;
use thiserror::Error;

/// Errors from membership stores, room directories and the capacity gate.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// `SQLite` error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// HTTP transport failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status.
    #[error("registry service returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// Malformed stored or received data.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Schema migration failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// Change subscription could not be established.
    #[error("subscription failed: {0}")]
    Subscription(String),

    /// The store does not offer this operation.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    /// Background task failed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RegistryError {
    /// Shared classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Sqlite(_) | Self::Pool(_) | Self::Http(_) | Self::Subscription(_) => {
                ErrorKind::TransientNetwork
            }
            Self::Status { status, .. } => match *status {
                404 => ErrorKind::NotFound,
                400..=499 => ErrorKind::Validation,
                _ => ErrorKind::TransientNetwork,
            },
            Self::Serde(_) | Self::Migration(_) | Self::Unsupported(_) | Self::Internal(_) => {
                ErrorKind::Configuration
            }
        }
    }

    /// Whether retrying may help.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        let not_found = RegistryError::Status {
            status: 404,
            body: String::new(),
        };
        assert_eq!(not_found.kind(), ErrorKind::NotFound);
        let bad = RegistryError::Status {
            status: 400,
            body: String::new(),
        };
        assert_eq!(bad.kind(), ErrorKind::Validation);
        let down = RegistryError::Status {
            status: 503,
            body: String::new(),
        };
        assert!(down.is_retryable());
    }

    #[test]
    fn sqlite_is_transient() {
        let err = RegistryError::Sqlite(rusqlite::Error::QueryReturnedNoRows);
        assert!(err.to_string().contains("sqlite error"));
        assert!(err.is_retryable());
    }

    #[test]
    fn unsupported_is_configuration() {
        let err = RegistryError::Unsupported("conditional insert");
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
