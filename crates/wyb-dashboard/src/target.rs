//! Which system to talk to, and at which URL.
//!
//! Resolution order for the system: `--system`, then the last system used,
//! then `kandidaten`. For the URL: `--url`, then the URL saved for that
//! system, then the configured one.

use anyhow::{Result, bail};
use wyb_settings::state::keys;
use wyb_settings::{KANDIDATEN, StateStore, WybSettings};

/// Where the URL came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UrlSource {
    /// `--url`.
    Flag,
    /// Saved in the dashboard state.
    Saved,
    /// `settings.systems`.
    Settings,
}

/// Resolved connection target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub system: String,
    pub url: String,
    pub url_source: UrlSource,
}

pub fn resolve(
    system_flag: Option<&str>,
    url_flag: Option<&str>,
    settings: &WybSettings,
    state: &StateStore,
) -> Result<Target> {
    let system = system_flag
        .map(str::to_string)
        .or_else(|| state.get::<String>(keys::LAST_SYSTEM))
        .unwrap_or_else(|| KANDIDATEN.to_string());

    if let Some(url) = url_flag {
        return Ok(Target {
            system,
            url: url.to_string(),
            url_source: UrlSource::Flag,
        });
    }
    if let Some(url) = state.get::<String>(&keys::saved_url(&system)) {
        return Ok(Target {
            system,
            url,
            url_source: UrlSource::Saved,
        });
    }
    let Some(url) = settings.system_url(&system) else {
        let known: Vec<&str> = settings.systems.keys().map(String::as_str).collect();
        bail!(
            "no URL for system '{system}' (configured: {}); pass --url",
            known.join(", ")
        );
    };
    Ok(Target {
        url: url.to_string(),
        system,
        url_source: UrlSource::Settings,
    })
}

/// Persist the target after a successful connect.
pub fn remember(state: &mut StateStore, target: &Target) -> wyb_settings::Result<()> {
    state.set(keys::LAST_SYSTEM, &target.system)?;
    if target.url_source == UrlSource::Flag {
        state.set(&keys::saved_url(&target.system), &target.url)?;
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
