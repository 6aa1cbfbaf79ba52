//! Identifier newtypes.
//!
//! [`RoomId`] is the page-derived room token, [`Uid`] the numeric session
//! identity announced to the audio transport, and [`IdempotencyKey`] the
//! per-command key the control bridge reuses across delivery attempts.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// RoomId
// ─────────────────────────────────────────────────────────────────────────────

static ROOM_TOKEN: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^\w{1,128}$").ok());

/// Rejected room token.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid room id: {0:?}")]
pub struct InvalidRoomId(pub String);

/// Room identifier derived from the page's token.
///
/// Only word characters are accepted, matching what the page URL pattern
/// captures.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    /// Validate and wrap a room token.
    pub fn parse(token: impl Into<String>) -> Result<Self, InvalidRoomId> {
        let token = token.into();
        let valid = ROOM_TOKEN.as_ref().is_some_and(|re| re.is_match(&token));
        if valid {
            Ok(Self(token))
        } else {
            Err(InvalidRoomId(token))
        }
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Realtime topic name for this room's change notifications.
    #[must_use]
    pub fn topic(&self) -> String {
        format!("room:{}", self.0)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RoomId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoomId {
    type Error = InvalidRoomId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> Self {
        id.0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Uid
// ─────────────────────────────────────────────────────────────────────────────

/// Numeric session identity in `[0, 2^31)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(u32);

impl Uid {
    /// Largest representable identity.
    pub const MAX: u32 = 0x7FFF_FFFF;

    /// Wrap a raw value, rejecting anything at or above `2^31`.
    #[must_use]
    pub fn new(raw: u32) -> Option<Self> {
        (raw <= Self::MAX).then_some(Self(raw))
    }

    /// Reduce an arbitrary 64-bit value into the identity range.
    #[must_use]
    pub fn from_wide(raw: u64) -> Self {
        Self((raw & u64::from(Self::MAX)) as u32)
    }

    /// The raw numeric value.
    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// IdempotencyKey
// ─────────────────────────────────────────────────────────────────────────────

/// Key attached to one logical control command, reused across retries.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Create a new time-ordered key (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for IdempotencyKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdempotencyKey {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
