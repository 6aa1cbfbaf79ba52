//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a partial
//! settings file only overrides the keys it names.

use dexchat_core::retry::RetryConfig;
use dexchat_core::tier::Tier;
use serde::{Deserialize, Serialize};

/// Root settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DexchatSettings {
    /// Backend service endpoints.
    pub services: ServiceSettings,
    /// Room capacity policy.
    pub capacity: CapacitySettings,
    /// Control bridge delivery.
    pub bridge: BridgeSettings,
    /// Control surface status polling.
    pub poll: PollSettings,
    /// Session behaviour.
    pub session: SessionSettings,
    /// Identity storage.
    pub identity: IdentitySettings,
    /// Logging.
    pub logging: LoggingSettings,
}

impl DexchatSettings {
    /// Clamp out-of-range values into their accepted bounds.
    #[must_use]
    pub fn validated(mut self) -> Self {
        self.services.request_timeout_ms = self.services.request_timeout_ms.clamp(500, 120_000);
        self.capacity.basic = self.capacity.basic.max(1);
        self.capacity.premium = self.capacity.premium.max(self.capacity.basic);
        self.capacity.free_display_cap = self.capacity.free_display_cap.max(1);
        self.bridge.max_attempts = self.bridge.max_attempts.clamp(1, 10);
        self.bridge.base_delay_ms = self.bridge.base_delay_ms.min(60_000);
        self.bridge.delivery_timeout_ms = self.bridge.delivery_timeout_ms.clamp(100, 60_000);
        self.bridge.replay_capacity = self.bridge.replay_capacity.clamp(1, 1024);
        self.poll.interval_ms = self.poll.interval_ms.clamp(1000, 600_000);
        self.poll.notice_ttl_ms = self.poll.notice_ttl_ms.clamp(500, 60_000);
        self.session.unload_timeout_ms = self.session.unload_timeout_ms.clamp(50, 10_000);
        self
    }
}

/// Backend service endpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceSettings {
    /// Base URL of the token, room and billing backend.
    pub backend_url: String,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:3001/api".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

/// Room capacity policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CapacitySettings {
    /// Capacity for `basic` participants.
    pub basic: u64,
    /// Capacity for tiers above basic.
    pub premium: u64,
    /// Cap shown to `free` participants.
    pub free_display_cap: u64,
    /// Enforce `freeDisplayCap` at admission instead of only displaying it.
    pub enforce_free_cap: bool,
    /// Use the store's atomic conditional insert when it offers one.
    pub prefer_atomic_admission: bool,
}

impl Default for CapacitySettings {
    fn default() -> Self {
        Self {
            basic: 100,
            premium: 10_000,
            free_display_cap: 10,
            enforce_free_cap: false,
            prefer_atomic_admission: true,
        }
    }
}

impl CapacitySettings {
    /// Admission capacity for `tier`.
    #[must_use]
    pub fn capacity_for(&self, tier: Tier) -> u64 {
        match tier {
            Tier::Basic => self.basic,
            Tier::Free if self.enforce_free_cap => self.free_display_cap,
            Tier::Free | Tier::Premium => self.premium,
        }
    }

    /// Capacity shown to a participant of `tier`.
    #[must_use]
    pub fn display_capacity_for(&self, tier: Tier) -> u64 {
        match tier {
            Tier::Free => self.free_display_cap,
            other => self.capacity_for(other),
        }
    }
}

/// Control bridge delivery settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    /// Delivery attempts per command.
    pub max_attempts: u32,
    /// Linear backoff base in milliseconds.
    pub base_delay_ms: u64,
    /// Timeout for a single delivery in milliseconds.
    pub delivery_timeout_ms: u64,
    /// Replies remembered for idempotent replay.
    pub replay_capacity: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            delivery_timeout_ms: 5000,
            replay_capacity: 32,
        }
    }
}

impl BridgeSettings {
    /// Retry parameters for the bridge.
    #[must_use]
    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            base_delay_ms: self.base_delay_ms,
        }
    }
}

/// Status polling settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollSettings {
    /// Poll interval in milliseconds.
    pub interval_ms: u64,
    /// Lifetime of a transient error notice in milliseconds.
    pub notice_ttl_ms: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            notice_ttl_ms: 5000,
        }
    }
}

/// Session behaviour.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Join the voice channel right after admission.
    pub auto_join: bool,
    /// Echo cancellation on microphone capture.
    pub echo_cancellation: bool,
    /// Noise suppression on microphone capture.
    pub noise_suppression: bool,
    /// Bound on teardown cleanup during unload, in milliseconds.
    pub unload_timeout_ms: u64,
    /// Level above which a participant counts as speaking.
    pub speaking_threshold: f32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            auto_join: true,
            echo_cancellation: true,
            noise_suppression: true,
            unload_timeout_ms: 1500,
            speaking_threshold: 0.06,
        }
    }
}

/// Identity storage settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IdentitySettings {
    /// Profile identity file, relative to `~/.dexchat` unless absolute.
    pub profile_path: String,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            profile_path: "identity.json".to_string(),
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_policy_defaults() {
        let cap = CapacitySettings::default();
        assert_eq!(cap.capacity_for(Tier::Basic), 100);
        assert_eq!(cap.capacity_for(Tier::Premium), 10_000);
        assert_eq!(cap.capacity_for(Tier::Free), 10_000);
        assert_eq!(cap.display_capacity_for(Tier::Free), 10);
    }

    #[test]
    fn free_cap_enforced_when_enabled() {
        let cap = CapacitySettings {
            enforce_free_cap: true,
            ..CapacitySettings::default()
        };
        assert_eq!(cap.capacity_for(Tier::Free), 10);
    }

    #[test]
    fn validated_clamps() {
        let mut s = DexchatSettings::default();
        s.bridge.max_attempts = 0;
        s.poll.interval_ms = 1;
        s.capacity.premium = 5;
        let s = s.validated();
        assert_eq!(s.bridge.max_attempts, 1);
        assert_eq!(s.poll.interval_ms, 1000);
        assert_eq!(s.capacity.premium, 100);
    }

    #[test]
    fn camel_case_wire_names() {
        let json = serde_json::to_value(DexchatSettings::default()).unwrap();
        assert_eq!(json["capacity"]["freeDisplayCap"], 10);
        assert_eq!(json["bridge"]["maxAttempts"], 3);
        assert_eq!(json["session"]["autoJoin"], true);
    }

    #[test]
    fn bridge_retry_config() {
        let retry = BridgeSettings::default().retry();
        assert_eq!(retry, RetryConfig::default());
    }
}
