//! # dexchat-settings
//!
//! Layered configuration for the DexChat crates.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`DexchatSettings::default()`]
//! 2. **User file**: `~/.dexchat/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `DEXCHAT_*` overrides (highest priority)
//!
//! The global snapshot is reloadable: [`reload_settings_from_path`] swaps the
//! cached value so later [`get_settings`] calls see fresh data.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, resolve_path, settings_path};
pub use types::*;

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

/// Global settings snapshot.
static SETTINGS: RwLock<Option<Arc<DexchatSettings>>> = RwLock::new(None);

/// Get the global settings instance.
///
/// Loads from disk on first access; falls back to compiled defaults if
/// loading fails. Returns an `Arc` so callers keep a consistent snapshot
/// across a concurrent reload.
pub fn get_settings() -> Arc<DexchatSettings> {
    if let Some(s) = SETTINGS.read().as_ref() {
        return Arc::clone(s);
    }

    let mut guard = SETTINGS.write();
    if let Some(s) = guard.as_ref() {
        return Arc::clone(s);
    }

    let settings = Arc::new(match load_settings() {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            DexchatSettings::default()
        }
    });
    *guard = Some(Arc::clone(&settings));
    settings
}

/// Replace the global settings with a specific value.
pub fn init_settings(settings: DexchatSettings) {
    *SETTINGS.write() = Some(Arc::new(settings.validated()));
}

/// Reload settings from a specific file path and swap the global cache.
pub fn reload_settings_from_path(path: &Path) {
    let new = Arc::new(match load_settings_from_path(path) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, ?path, "failed to reload settings, falling back to defaults");
            DexchatSettings::default()
        }
    });
    *SETTINGS.write() = Some(new);
    tracing::info!(?path, "settings reloaded from disk");
}

#[cfg(test)]
pub(crate) fn reset_settings() {
    *SETTINGS.write() = None;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Tests touching the global snapshot hold this lock.
    static SETTINGS_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[test]
    fn init_settings_sets_custom_value() {
        let _lock = SETTINGS_MUTEX.lock().unwrap();
        reset_settings();
        let mut custom = DexchatSettings::default();
        custom.capacity.basic = 25;
        init_settings(custom);
        assert_eq!(get_settings().capacity.basic, 25);
        reset_settings();
    }

    #[test]
    fn reload_settings_from_path_updates_cached_value() {
        let _lock = SETTINGS_MUTEX.lock().unwrap();
        reset_settings();
        init_settings(DexchatSettings::default());
        let held = get_settings();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"poll": {"intervalMs": 2000}}"#).unwrap();
        reload_settings_from_path(&path);

        assert_eq!(get_settings().poll.interval_ms, 2000);
        assert_eq!(held.poll.interval_ms, 10_000);
        reset_settings();
    }

    #[test]
    fn reload_with_bad_file_falls_back_to_defaults() {
        let _lock = SETTINGS_MUTEX.lock().unwrap();
        reset_settings();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{{{").unwrap();
        reload_settings_from_path(&path);
        assert_eq!(get_settings().bridge.max_attempts, 3);
        reset_settings();
    }
}
