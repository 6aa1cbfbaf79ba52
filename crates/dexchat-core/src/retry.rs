//! Retry configuration and linear backoff.
//!
//! Control-surface deliveries are retried a small, fixed number of times
//! with a delay that grows linearly with the attempt number. The async loop
//! lives in `dexchat-bridge`; this module holds the portable parameters and
//! the delay math.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of delivery attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Parameters for retried delivery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Total attempts including the first (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay; attempt `n` waits `n * base` before the next (default: 1000).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
        }
    }
}

impl RetryConfig {
    /// Delay to wait after failed attempt `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        Duration::from_millis(linear_backoff_delay(attempt, self.base_delay_ms))
    }
}

/// Linear backoff: `attempt * base_delay_ms`, saturating.
///
/// `attempt` is 1-based; attempt 0 yields no delay.
#[must_use]
pub fn linear_backoff_delay(attempt: u32, base_delay_ms: u64) -> u64 {
    base_delay_ms.saturating_mul(u64::from(attempt))
}
