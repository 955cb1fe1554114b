//! One service instance per configured system.

use std::collections::BTreeMap;

use futures::future::join_all;
use tracing::info;
use wyb_core::errors::Result;
use wyb_settings::WybSettings;

use crate::connection::{ConnectOptions, ConnectionStatus, ServiceConfig};
use crate::service::WsService;

struct Entry {
    url: String,
    service: WsService,
}

/// Independent [`WsService`] instances keyed by system name.
pub struct SystemRegistry {
    entries: BTreeMap<String, Entry>,
}

impl SystemRegistry {
    /// Build one service per entry of `settings.systems`.
    pub fn from_settings(settings: &WybSettings) -> Self {
        let config = ServiceConfig::from(&settings.connection);
        let entries = settings
            .systems
            .iter()
            .map(|(name, system)| {
                let entry = Entry {
                    url: system.url.clone(),
                    service: WsService::new(name.clone(), config.clone()),
                };
                (name.clone(), entry)
            })
            .collect();
        Self { entries }
    }

    /// Service for `system`.
    pub fn get(&self, system: &str) -> Option<&WsService> {
        self.entries.get(system).map(|e| &e.service)
    }

    /// Configured URL for `system`.
    pub fn url(&self, system: &str) -> Option<&str> {
        self.entries.get(system).map(|e| e.url.as_str())
    }

    /// System names in sorted order.
    pub fn systems(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of systems.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no systems are configured.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Connect every system to its configured URL concurrently.
    pub async fn connect_all(&self, options: ConnectOptions) -> BTreeMap<String, Result<()>> {
        let attempts = self.entries.iter().map(|(name, entry)| async move {
            let outcome = entry.service.connect(&entry.url, options).await;
            (name.clone(), outcome)
        });
        let results: BTreeMap<String, Result<()>> = join_all(attempts).await.into_iter().collect();
        let connected = results.values().filter(|r| r.is_ok()).count();
        info!(connected, total = results.len(), "systems connected");
        results
    }

    /// Disconnect every system.
    pub fn disconnect_all(&self) {
        for entry in self.entries.values() {
            entry.service.disconnect();
        }
    }

    /// Lifecycle state of every system.
    pub fn statuses(&self) -> BTreeMap<String, ConnectionStatus> {
        self.entries
            .iter()
            .map(|(name, entry)| (name.clone(), entry.service.status()))
            .collect()
    }
}

impl std::fmt::Debug for SystemRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(name, e)| (name, &e.url)))
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
