//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`DexchatSettings::default()`]
//! 2. If `~/.dexchat/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `DEXCHAT_*` environment overrides
//! 4. Clamp out-of-range values
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::DexchatSettings;

/// Resolve the DexChat home directory (`~/.dexchat`).
pub fn settings_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".dexchat")
}

/// Resolve the path to the settings file (`~/.dexchat/settings.json`).
pub fn settings_path() -> PathBuf {
    settings_dir().join("settings.json")
}

/// Resolve a settings-relative path against `~/.dexchat`.
pub fn resolve_path(path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        settings_dir().join(p)
    }
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<DexchatSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<DexchatSettings> {
    let defaults = serde_json::to_value(DexchatSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: DexchatSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings.validated())
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning.
pub fn apply_env_overrides(settings: &mut DexchatSettings) {
    if let Some(v) = read_env_string("DEXCHAT_BACKEND_URL") {
        settings.services.backend_url = v;
    }
    if let Some(v) = read_env_u64("DEXCHAT_REQUEST_TIMEOUT_MS", 500, 120_000) {
        settings.services.request_timeout_ms = v;
    }

    // ── Capacity ────────────────────────────────────────────────────
    if let Some(v) = read_env_u64("DEXCHAT_BASIC_CAPACITY", 1, 1_000_000) {
        settings.capacity.basic = v;
    }
    if let Some(v) = read_env_u64("DEXCHAT_PREMIUM_CAPACITY", 1, 1_000_000) {
        settings.capacity.premium = v;
    }
    if let Some(v) = read_env_bool("DEXCHAT_ENFORCE_FREE_CAP") {
        settings.capacity.enforce_free_cap = v;
    }
    if let Some(v) = read_env_bool("DEXCHAT_ATOMIC_ADMISSION") {
        settings.capacity.prefer_atomic_admission = v;
    }

    // ── Bridge / poll ───────────────────────────────────────────────
    if let Some(v) = read_env_u64("DEXCHAT_BRIDGE_ATTEMPTS", 1, 10) {
        settings.bridge.max_attempts = v as u32;
    }
    if let Some(v) = read_env_u64("DEXCHAT_BRIDGE_BASE_DELAY_MS", 0, 60_000) {
        settings.bridge.base_delay_ms = v;
    }
    if let Some(v) = read_env_u64("DEXCHAT_POLL_INTERVAL_MS", 1000, 600_000) {
        settings.poll.interval_ms = v;
    }

    // ── Session ─────────────────────────────────────────────────────
    if let Some(v) = read_env_bool("DEXCHAT_AUTO_JOIN") {
        settings.session.auto_join = v;
    }
    if let Some(v) = read_env_string("DEXCHAT_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

// ── Env var readers ─────────────────────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid integer env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;

    // -- deep_merge --

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"capacity": {"basic": 100, "premium": 10000}});
        let source = serde_json::json!({"capacity": {"basic": 50}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["capacity"]["basic"], 50);
        assert_eq!(merged["capacity"]["premium"], 10000);
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1});
        let merged = deep_merge(target, serde_json::json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_array_replaces() {
        let merged = deep_merge(serde_json::json!({"x": [1, 2]}), serde_json::json!({"x": [3]}));
        assert_eq!(merged["x"], serde_json::json!([3]));
    }

    // -- load_settings_from_path --

    #[test]
    fn missing_file_returns_defaults() {
        let settings = load_settings_from_path(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.capacity.basic, 100);
        assert_eq!(settings.poll.interval_ms, 10_000);
    }

    #[test]
    fn partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"bridge": {"maxAttempts": 5}, "services": {"backendUrl": "https://api.example"}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.bridge.max_attempts, 5);
        assert_eq!(settings.bridge.base_delay_ms, 1000);
        assert_eq!(settings.services.backend_url, "https://api.example");
    }

    #[test]
    fn out_of_range_file_values_are_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"bridge": {"maxAttempts": 99}}"#).unwrap();
        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.bridge.max_attempts, 10);
    }

    #[test]
    fn invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            load_settings_from_path(&path).unwrap_err(),
            SettingsError::Json(_)
        ));
    }

    // -- parsing --

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_u64_range_bounds() {
        assert_eq!(parse_u64_range("1000", 1000, 2000), Some(1000));
        assert_eq!(parse_u64_range(" 2000 ", 1000, 2000), Some(2000));
        assert_eq!(parse_u64_range("999", 1000, 2000), None);
        assert_eq!(parse_u64_range("abc", 0, 10), None);
    }

    #[test]
    fn resolve_path_keeps_absolute() {
        assert_eq!(resolve_path("/var/id.json"), PathBuf::from("/var/id.json"));
        assert!(resolve_path("identity.json").ends_with(".dexchat/identity.json"));
    }
}
