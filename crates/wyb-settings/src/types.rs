//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so a partial `settings.json` only needs the fields it overrides.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use wyb_core::backoff::{self, BackoffPolicy};
use wyb_core::constants::{DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_REQUEST_TIMEOUT_MS};

/// System name of the candidate display wall.
pub const KANDIDATEN: &str = "kandidaten";
/// System name of the second display wall.
pub const SOY: &str = "soy";

/// Root settings type for the dashboard.
///
/// ```json
/// {
///   "systems": { "kandidaten": { "url": "ws://10.0.0.5:8765" } },
///   "connection": { "requestTimeoutMs": 3000 }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WybSettings {
    /// Settings schema version.
    pub version: String,
    /// Remote systems by name. Each gets its own service instance.
    pub systems: BTreeMap<String, SystemSettings>,
    /// Timeouts and reconnection schedule shared by all systems.
    pub connection: ConnectionSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for WybSettings {
    fn default() -> Self {
        let systems = [
            (KANDIDATEN, "ws://localhost:8765"),
            (SOY, "ws://localhost:8766"),
        ]
        .into_iter()
        .map(|(name, url)| (name.to_string(), SystemSettings { url: url.into() }))
        .collect();
        Self {
            version: "0.1.0".to_string(),
            systems,
            connection: ConnectionSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl WybSettings {
    /// URL configured for `system`.
    pub fn system_url(&self, system: &str) -> Option<&str> {
        self.systems.get(system).map(|s| s.url.as_str())
    }
}

/// One remote display system.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SystemSettings {
    /// WebSocket endpoint (`ws://` or `wss://`).
    pub url: String,
}

/// Connection lifecycle and request timing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Handshake deadline in milliseconds.
    pub connect_timeout_ms: u64,
    /// Reply deadline for request operations in milliseconds.
    pub request_timeout_ms: u64,
    /// Reconnection attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// First reconnection delay in milliseconds.
    pub base_backoff_ms: u64,
    /// Growth factor after each failed reconnection.
    pub backoff_multiplier: f64,
    /// Reconnection delay cap in milliseconds.
    pub max_backoff_ms: u64,
    /// Reachability probe deadline in milliseconds.
    pub probe_timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            max_reconnect_attempts: backoff::DEFAULT_MAX_ATTEMPTS,
            base_backoff_ms: backoff::DEFAULT_BASE_DELAY_MS,
            backoff_multiplier: backoff::DEFAULT_MULTIPLIER,
            max_backoff_ms: backoff::DEFAULT_MAX_DELAY_MS,
            probe_timeout_ms: 2_000,
        }
    }
}

impl ConnectionSettings {
    /// Handshake deadline.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Reply deadline.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Probe deadline.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Reconnection schedule.
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.max_reconnect_attempts,
            base_delay_ms: self.base_backoff_ms,
            multiplier: self.backoff_multiplier,
            max_delay_ms: self.max_backoff_ms,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: wyb_core::logging::DEFAULT_LEVEL.to_string(),
        }
    }
}
