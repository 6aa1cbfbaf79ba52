//! Shared error classification.
//!
//! Every crate keeps its own `thiserror` enum and maps each variant onto an
//! [`ErrorKind`]. The kind drives retry decisions in the control bridge and
//! what the control surface shows the user.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification of a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing service credentials or backend misconfiguration.
    Configuration,
    /// Missing or malformed request parameters.
    Validation,
    /// Entity not found.
    NotFound,
    /// Network fault, timeout, or server-side error. Retriable.
    TransientNetwork,
    /// Room is full.
    Capacity,
    /// Microphone or audio device unavailable or denied.
    Device,
    /// Command issued in a session state that does not allow it.
    InvalidState,
}

impl ErrorKind {
    /// Stable machine-readable code.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Configuration => "configuration_error",
            Self::Validation => "validation_error",
            Self::NotFound => "not_found",
            Self::TransientNetwork => "transient_network_error",
            Self::Capacity => "capacity_reached",
            Self::Device => "device_error",
            Self::InvalidState => "invalid_state",
        }
    }

    /// Whether an operation failing with this kind may succeed on retry.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::TransientNetwork)
    }

    /// Whether this kind is an expected outcome rather than a fault.
    #[must_use]
    pub fn is_informational(self) -> bool {
        matches!(self, Self::Capacity)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        assert!(ErrorKind::TransientNetwork.is_retryable());
        for kind in [
            ErrorKind::Configuration,
            ErrorKind::Validation,
            ErrorKind::NotFound,
            ErrorKind::Capacity,
            ErrorKind::Device,
            ErrorKind::InvalidState,
        ] {
            assert!(!kind.is_retryable(), "{kind} should not retry");
        }
    }

    #[test]
    fn capacity_is_informational() {
        assert!(ErrorKind::Capacity.is_informational());
        assert!(!ErrorKind::Device.is_informational());
    }

    #[test]
    fn serde_snake_case() {
        let json = serde_json::to_string(&ErrorKind::TransientNetwork).unwrap();
        assert_eq!(json, "\"transient_network\"");
        assert_eq!(ErrorKind::Configuration.to_string(), "configuration_error");
    }
}
