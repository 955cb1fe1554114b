//! Connection state, options and URL checks.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;
use wyb_core::backoff::BackoffPolicy;
use wyb_core::constants::{DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_REQUEST_TIMEOUT_MS};
use wyb_core::errors::ClientError;
use wyb_settings::ConnectionSettings;

/// Lifecycle state of a service instance.
///
/// There is no closing state: [`WsService::disconnect`] is synchronous. It
/// queues the close frame for the writer task and moves straight to
/// `Disconnected`, so a half-closed connection is never observable.
///
/// [`WsService::disconnect`]: crate::WsService::disconnect
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No transport. A reconnection may be scheduled.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Transport open; sends are accepted.
    Connected,
}

/// Per-call connect options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Never reconnect automatically after an unclean close.
    pub no_reconnect: bool,
    /// Reconnect without the attempt ceiling.
    pub unlimited_reconnects: bool,
    /// Override the configured connect timeout.
    pub connect_timeout: Option<Duration>,
}

impl ConnectOptions {
    /// Options that disable automatic reconnection.
    pub fn no_reconnect() -> Self {
        Self {
            no_reconnect: true,
            ..Self::default()
        }
    }

    /// Set the connect timeout for this call.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

/// Timeouts and reconnection schedule of a service instance.
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceConfig {
    /// Handshake deadline.
    pub connect_timeout: Duration,
    /// Default request deadline.
    pub request_timeout: Duration,
    /// Reconnection schedule.
    pub backoff: BackoffPolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl From<&ConnectionSettings> for ServiceConfig {
    fn from(settings: &ConnectionSettings) -> Self {
        Self {
            connect_timeout: settings.connect_timeout(),
            request_timeout: settings.request_timeout(),
            backoff: settings.backoff_policy(),
        }
    }
}

/// Point-in-time view of the connection.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConnectionSnapshot {
    /// Lifecycle state.
    pub status: ConnectionStatus,
    /// URL of the current or last attempted connection.
    pub url: Option<String>,
    /// Most recent failure.
    #[serde(skip)]
    pub last_error: Option<ClientError>,
    /// Reconnection attempts since the last successful open.
    pub attempt_count: u32,
    /// Delay before the next reconnection attempt.
    #[serde(serialize_with = "serialize_millis")]
    pub backoff: Duration,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Mutable per-instance state. Guarded by a single lock in the service.
///
/// `generation` increments whenever a connect attempt starts or the caller
/// disconnects. Tasks remember the generation they were spawned for and
/// drop their results when it has moved on.
#[derive(Debug)]
pub(crate) struct ConnectionState {
    pub(crate) url: Option<String>,
    pub(crate) options: ConnectOptions,
    pub(crate) status: ConnectionStatus,
    pub(crate) last_error: Option<ClientError>,
    pub(crate) attempt_count: u32,
    pub(crate) backoff: Duration,
    pub(crate) generation: u64,
    pub(crate) outbound: Option<mpsc::UnboundedSender<Message>>,
    pub(crate) reader: Option<JoinHandle<()>>,
    pub(crate) pending_connect: Option<CancellationToken>,
    pub(crate) reconnect_timer: Option<JoinHandle<()>>,
}

impl ConnectionState {
    pub(crate) fn new(initial_backoff: Duration) -> Self {
        Self {
            url: None,
            options: ConnectOptions::default(),
            status: ConnectionStatus::Disconnected,
            last_error: None,
            attempt_count: 0,
            backoff: initial_backoff,
            generation: 0,
            outbound: None,
            reader: None,
            pending_connect: None,
            reconnect_timer: None,
        }
    }

    pub(crate) fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            status: self.status,
            url: self.url.clone(),
            last_error: self.last_error.clone(),
            attempt_count: self.attempt_count,
            backoff: self.backoff,
        }
    }

    /// Cancel the in-flight handshake and stop the timer and reader tasks.
    pub(crate) fn stop_tasks(&mut self) {
        if let Some(token) = self.pending_connect.take() {
            token.cancel();
        }
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Check that `raw` is an absolute `ws://` or `wss://` URL.
pub fn validate_url(raw: &str) -> Result<Url, ClientError> {
    let invalid = |reason: String| ClientError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw).map_err(|err| invalid(err.to_string()))?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => return Err(invalid(format!("scheme must be ws or wss, got '{other}'"))),
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
