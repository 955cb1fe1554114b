//! # wyb-settings
//!
//! Configuration management with layered sources for the dashboard.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`WybSettings::default()`]
//! 2. **User file**: `~/.wyb/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `WYB_*` overrides (highest priority)
//!
//! The [`state`] module persists the small amount of dashboard state that
//! survives restarts (last used system, saved URLs).

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod state;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use state::StateStore;
pub use types::*;

use std::sync::OnceLock;

/// Global settings singleton.
///
/// Initialized on first access via [`get_settings`]. Falls back to compiled
/// defaults if loading fails.
static SETTINGS: OnceLock<WybSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads settings from `~/.wyb/settings.json` with env var
/// overrides. On subsequent calls, returns the cached value.
pub fn get_settings() -> &'static WybSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "failed to load settings, using defaults");
            WybSettings::default()
        })
    })
}

/// Initialize the global settings with a specific value.
///
/// Returns `Err(settings)` if they were already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: WybSettings) -> std::result::Result<(), WybSettings> {
    SETTINGS.set(settings)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = WybSettings::default();
        let path = settings_path();
        assert!(path.ends_with(".wyb/settings.json"));
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = WybSettings::default();
        assert_eq!(settings.version, "0.1.0");
        assert_eq!(settings.systems.len(), 2);
        assert_eq!(settings.connection.connect_timeout_ms, 10_000);
        assert_eq!(settings.connection.request_timeout_ms, 5_000);
        assert_eq!(settings.connection.max_reconnect_attempts, 5);
        assert_eq!(settings.connection.base_backoff_ms, 1_000);
        assert_eq!(settings.connection.max_backoff_ms, 30_000);
        assert_eq!(settings.logging.level, "info");
    }
}
