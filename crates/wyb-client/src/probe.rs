//! Reachability probing.
//!
//! A [`Probe`] answers "is anything listening at this URL?" without opening a
//! WebSocket. The dashboard uses it to skip systems that are plainly down
//! before committing to a full connect timeout.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

use crate::connection::validate_url;

/// Cheap check that a server accepts connections.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Whether `url` is reachable. Invalid URLs are unreachable.
    async fn reachable(&self, url: &str) -> bool;
}

/// Bounded TCP connect to the URL's host and port.
#[derive(Clone, Copy, Debug)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    /// Probe that gives up after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Deadline per probe.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn reachable(&self, url: &str) -> bool {
        let Ok(parsed) = validate_url(url) else {
            return false;
        };
        let (Some(host), Some(port)) = (parsed.host_str(), parsed.port_or_known_default()) else {
            return false;
        };
        let host = host.trim_start_matches('[').trim_end_matches(']');

        match tokio::time::timeout(self.timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(err)) => {
                debug!(url, error = %err, "probe refused");
                false
            }
            Err(_) => {
                debug!(url, timeout = ?self.timeout, "probe timed out");
                false
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
