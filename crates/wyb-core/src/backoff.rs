//! Reconnection backoff configuration and delay calculation.
//!
//! The reconnect loop itself lives in `wyb-client` (it needs tokio). This
//! module holds the portable pieces:
//!
//! - [`BackoffPolicy`]: attempt ceiling, base delay, growth factor, cap
//! - [`BackoffPolicy::next_delay`]: one step of the multiplicative schedule
//! - [`BackoffPolicy::delay_for_attempt`]: closed form of the same schedule

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default reconnection attempt ceiling.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default first reconnection delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
/// Default growth factor applied after each failed reconnection.
pub const DEFAULT_MULTIPLIER: f64 = 1.5;
/// Default delay cap in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Reconnection schedule for a service instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffPolicy {
    /// Reconnection attempts allowed before giving up (default: 5).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first reconnection in ms (default: 1000).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Factor applied to the delay after a failed attempt (default: 1.5).
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Upper bound on any single delay in ms (default: 30000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_multiplier() -> f64 {
    DEFAULT_MULTIPLIER
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            multiplier: DEFAULT_MULTIPLIER,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Delay calculation
// ─────────────────────────────────────────────────────────────────────────────

impl BackoffPolicy {
    /// Delay used for the first reconnection after a successful session.
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms.min(self.max_delay_ms))
    }

    /// Upper bound on any delay.
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Delay after `current` failed: `min(current * multiplier, max)`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let grown = current.as_secs_f64() * self.multiplier.max(1.0);
        let capped = grown.min(self.max_delay().as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Delay before the 1-based reconnection `attempt`, assuming every earlier
    /// attempt failed: `min(base * multiplier^(attempt - 1), max)`.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let base = self.initial_delay().as_secs_f64();
        let grown = base * self.multiplier.max(1.0).powi(exponent);
        Duration::from_secs_f64(grown.min(self.max_delay().as_secs_f64()))
    }

    /// Whether another attempt is allowed after `attempts` have been used.
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
