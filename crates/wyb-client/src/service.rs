//! The WebSocket service: one instance per display system.
//!
//! A [`WsService`] owns a single transport, its event listeners and message
//! handlers, and the reconnection timer. Clones share the same instance;
//! separate instances share nothing.
//!
//! The socket is split into a writer task fed by an unbounded channel and a
//! reader task that routes inbound frames. Background tasks hold a weak
//! reference and a generation number, so they neither keep the service alive
//! nor act on a connection that has since been replaced.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wyb_core::constants::{CLIENT_CLOSE_REASON, CLOSE_ABNORMAL, CLOSE_NORMAL, CLOSE_NO_STATUS};
use wyb_core::errors::{ClientError, Result};
use wyb_settings::ConnectionSettings;

use crate::connection::{
    ConnectOptions, ConnectionSnapshot, ConnectionState, ConnectionStatus, ServiceConfig,
    validate_url,
};
use crate::events::{EventDispatcher, EventKind, ListenerId, ServiceEvent};
use crate::router::{HandlerId, MessageRouter};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long to keep reading after a close frame so the reply gets flushed.
const CLOSE_DRAIN: Duration = Duration::from_millis(250);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Origin {
    Caller,
    Reconnect,
}

pub(crate) struct Inner {
    pub(crate) system: String,
    pub(crate) config: ServiceConfig,
    pub(crate) state: Mutex<ConnectionState>,
    pub(crate) events: EventDispatcher,
    pub(crate) router: MessageRouter,
}

/// Resilient WebSocket link to one display server.
#[derive(Clone)]
pub struct WsService {
    pub(crate) inner: Arc<Inner>,
}

impl WsService {
    /// New, disconnected service for `system`.
    pub fn new(system: impl Into<String>, config: ServiceConfig) -> Self {
        let state = ConnectionState::new(config.backoff.initial_delay());
        Self {
            inner: Arc::new(Inner {
                system: system.into(),
                config,
                state: Mutex::new(state),
                events: EventDispatcher::new(),
                router: MessageRouter::new(),
            }),
        }
    }

    /// New service configured from connection settings.
    pub fn from_settings(system: impl Into<String>, settings: &ConnectionSettings) -> Self {
        Self::new(system, ServiceConfig::from(settings))
    }

    /// System name this instance serves.
    pub fn system(&self) -> &str {
        &self.inner.system
    }

    /// Timeouts and reconnection schedule.
    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Open a connection to `url`, replacing any existing one.
    ///
    /// Resolves once the transport is open. A URL that is not `ws://` or
    /// `wss://` is rejected before anything is torn down or opened. A failed
    /// or timed-out handshake is reported both as an `error` event and as the
    /// return value, and schedules a reconnection unless
    /// [`ConnectOptions::no_reconnect`] is set. If `disconnect` or another
    /// `connect` supersedes this attempt, it resolves to
    /// [`ClientError::Cancelled`].
    pub async fn connect(&self, url: &str, options: ConnectOptions) -> Result<()> {
        let _ = validate_url(url)?;
        self.disconnect();
        self.inner.open(url, options, Origin::Caller).await
    }

    /// Close the connection with code 1000.
    ///
    /// Idempotent. Local state is cleared and any scheduled reconnection is
    /// cancelled even when the close frame cannot be sent. Outstanding
    /// requests are left to their own timeouts.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Send one JSON frame.
    ///
    /// Rejected without side effects unless the service is connected and the
    /// transport is open, or when `message` fails to serialize.
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<()> {
        self.inner.send(message)
    }

    /// Current lifecycle state.
    pub fn status(&self) -> ConnectionStatus {
        self.inner.state.lock().status
    }

    /// Whether frames can be sent.
    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Point-in-time view of the connection.
    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.inner.state.lock().snapshot()
    }

    /// Most recent failure.
    pub fn last_error(&self) -> Option<ClientError> {
        self.inner.state.lock().last_error.clone()
    }

    // ── Events ──────────────────────────────────────────────────────

    /// Subscribe to a lifecycle event.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&ServiceEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.events.add(kind, listener)
    }

    /// Subscribe by event name. Unknown names are ignored.
    pub fn on_named<F>(&self, name: &str, listener: F) -> Option<ListenerId>
    where
        F: Fn(&ServiceEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.events.add_named(name, listener)
    }

    /// Unsubscribe a listener.
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.events.remove(id)
    }

    /// Listeners registered for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.inner.events.listener_count(kind)
    }

    // ── Message handlers ────────────────────────────────────────────

    /// Handle every inbound frame of `message_type`.
    pub fn on_message<F>(&self, message_type: &str, handler: F) -> HandlerId
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.router.on(message_type, handler)
    }

    /// Handle the next inbound frame of `message_type` only.
    pub fn once_message<F>(&self, message_type: &str, handler: F) -> HandlerId
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.router.once(message_type, handler)
    }

    /// Remove a message handler.
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.inner.router.remove(id)
    }

    /// Handlers registered for `message_type`.
    pub fn handler_count(&self, message_type: &str) -> usize {
        self.inner.router.handler_count(message_type)
    }
}

impl std::fmt::Debug for WsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsService")
            .field("system", &self.inner.system)
            .field("state", &self.inner.state.lock().snapshot())
            .field("events", &self.inner.events)
            .field("router", &self.inner.router)
            .finish()
    }
}

impl Inner {
    fn emit(&self, event: &ServiceEvent) {
        let _ = self.events.trigger(event);
    }

    async fn open(self: &Arc<Self>, url: &str, options: ConnectOptions, origin: Origin) -> Result<()> {
        let (generation, token, timeout) = {
            let mut state = self.state.lock();
            state.generation += 1;
            if let Some(previous) = state.pending_connect.take() {
                previous.cancel();
            }
            let token = CancellationToken::new();
            state.pending_connect = Some(token.clone());
            state.url = Some(url.to_string());
            state.options = options;
            state.status = ConnectionStatus::Connecting;
            let timeout = options.connect_timeout.unwrap_or(self.config.connect_timeout);
            (state.generation, token, timeout)
        };
        debug!(system = %self.system, url, ?origin, timeout_ms = millis(timeout), "connecting");

        let outcome = tokio::select! {
            () = token.cancelled() => {
                debug!(system = %self.system, url, "connect attempt superseded");
                return Err(ClientError::Cancelled("connect attempt superseded".into()));
            }
            outcome = tokio::time::timeout(timeout, connect_async(url)) => outcome,
        };

        let error = match outcome {
            Ok(Ok((ws, _response))) => return self.on_open(generation, url, ws),
            Ok(Err(err)) => ClientError::Transport {
                message: err.to_string(),
            },
            Err(_elapsed) => ClientError::ConnectTimeout {
                url: url.to_string(),
                timeout_ms: millis(timeout),
            },
        };
        self.on_connect_failed(generation, origin, &error);
        Err(error)
    }

    fn on_open(self: &Arc<Self>, generation: u64, url: &str, ws: WsStream) -> Result<()> {
        let (sink, stream) = ws.split();
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut state = self.state.lock();
            if state.generation != generation {
                return Err(ClientError::Cancelled("connect attempt superseded".into()));
            }
            state.status = ConnectionStatus::Connected;
            state.attempt_count = 0;
            state.backoff = self.config.backoff.initial_delay();
            state.pending_connect = None;
            state.outbound = Some(tx);
        }
        let _ = tokio::spawn(write_loop(sink, rx));

        info!(system = %self.system, url, "connected");
        self.emit(&ServiceEvent::Connected {
            url: url.to_string(),
        });

        let mut state = self.state.lock();
        if state.generation == generation {
            state.reader = Some(tokio::spawn(read_loop(
                Arc::downgrade(self),
                generation,
                stream,
            )));
        }
        Ok(())
    }

    fn on_connect_failed(self: &Arc<Self>, generation: u64, origin: Origin, error: &ClientError) {
        let reconnect = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            state.status = ConnectionStatus::Disconnected;
            state.pending_connect = None;
            state.last_error = Some(error.clone());
            if origin == Origin::Reconnect {
                state.backoff = self.config.backoff.next_delay(state.backoff);
            }
            !state.options.no_reconnect
        };
        warn!(system = %self.system, error = %error, "connect failed");
        self.emit(&ServiceEvent::Error(error.clone()));
        if reconnect {
            self.schedule_reconnect(generation);
        }
    }

    fn on_closed(self: &Arc<Self>, generation: u64, code: u16, reason: String) {
        let clean = code == CLOSE_NORMAL;
        let reconnect = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            state.status = ConnectionStatus::Disconnected;
            state.outbound = None;
            state.reader = None;
            if !clean {
                state.last_error = Some(ClientError::UncleanClose {
                    code,
                    reason: reason.clone(),
                });
            }
            !clean && !state.options.no_reconnect
        };

        if clean {
            info!(system = %self.system, code, "connection closed");
        } else {
            warn!(system = %self.system, code, reason = %reason, "connection closed uncleanly");
            self.emit(&ServiceEvent::Error(ClientError::UncleanClose {
                code,
                reason: reason.clone(),
            }));
        }
        self.emit(&ServiceEvent::Disconnected {
            code,
            reason,
            clean,
        });

        if reconnect {
            self.schedule_reconnect(generation);
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, generation: u64) {
        let scheduled = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            let Some(url) = state.url.clone() else {
                return;
            };
            if !state.options.unlimited_reconnects
                && !self.config.backoff.allows(state.attempt_count)
            {
                Err(state.attempt_count)
            } else {
                state.attempt_count += 1;
                if let Some(timer) = state.reconnect_timer.take() {
                    timer.abort();
                }
                Ok((state.attempt_count, state.backoff, url, state.options))
            }
        };

        let (attempt, delay, url, options) = match scheduled {
            Ok(next) => next,
            Err(attempts) => {
                error!(system = %self.system, attempts, "giving up on reconnection");
                self.emit(&ServiceEvent::Error(ClientError::MaxReconnectAttempts {
                    attempts,
                }));
                return;
            }
        };

        info!(system = %self.system, attempt, delay_ms = millis(delay), "reconnect scheduled");
        self.emit(&ServiceEvent::Reconnecting { attempt, delay });

        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        let weak = Arc::downgrade(self);
        state.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            {
                let mut state = inner.state.lock();
                if state.generation != generation {
                    return;
                }
                state.reconnect_timer = None;
            }
            debug!(system = %inner.system, attempt, "reconnecting");
            let _ = inner.open(&url, options, Origin::Reconnect).await;
        }));
    }

    fn disconnect(&self) {
        let (was_connected, outbound) = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.stop_tasks();
            let was_connected = state.status == ConnectionStatus::Connected;
            state.status = ConnectionStatus::Disconnected;
            state.attempt_count = 0;
            state.backoff = self.config.backoff.initial_delay();
            state.url = None;
            state.options = ConnectOptions::default();
            (was_connected, state.outbound.take())
        };

        if let Some(outbound) = outbound {
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: CLIENT_CLOSE_REASON.into(),
            };
            if outbound.send(Message::Close(Some(frame))).is_err() {
                let error = ClientError::Transport {
                    message: "close frame could not be sent: writer stopped".into(),
                };
                warn!(system = %self.system, error = %error, "disconnect");
                self.state.lock().last_error = Some(error.clone());
                self.emit(&ServiceEvent::Error(error));
            }
        }

        if was_connected {
            info!(system = %self.system, "disconnected");
            self.emit(&ServiceEvent::Disconnected {
                code: CLOSE_NORMAL,
                reason: CLIENT_CLOSE_REASON.to_string(),
                clean: true,
            });
        }
    }

    fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<()> {
        let outbound = {
            let state = self.state.lock();
            if state.status != ConnectionStatus::Connected {
                return Err(ClientError::send_rejected("not connected"));
            }
            match &state.outbound {
                Some(tx) if !tx.is_closed() => tx.clone(),
                _ => return Err(ClientError::send_rejected("transport is not open")),
            }
        };
        let text = serde_json::to_string(message)
            .map_err(|err| ClientError::send_rejected(format!("serialization failed: {err}")))?;
        outbound
            .send(Message::Text(text.into()))
            .map_err(|_| ClientError::send_rejected("transport is not open"))
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.state.get_mut().stop_tasks();
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = rx.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(err) = sink.send(message).await {
            debug!(error = %err, "websocket write failed");
            break;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(inner: Weak<Inner>, generation: u64, mut stream: SplitStream<WsStream>) {
    let (code, reason) = loop {
        let Some(next) = stream.next().await else {
            break (CLOSE_ABNORMAL, "connection lost".to_string());
        };
        let Some(service) = inner.upgrade() else {
            return;
        };
        match next {
            Ok(Message::Text(text)) => {
                service
                    .router
                    .route(&service.system, text.as_str(), &service.events);
            }
            Ok(Message::Close(frame)) => {
                let _ = tokio::time::timeout(CLOSE_DRAIN, stream.next()).await;
                break frame.map_or_else(
                    || (CLOSE_NO_STATUS, String::new()),
                    |frame| (u16::from(frame.code), frame.reason.as_str().to_owned()),
                );
            }
            Ok(Message::Binary(data)) => {
                debug!(system = %service.system, len = data.len(), "ignoring binary frame");
            }
            Ok(_) => {}
            Err(err) => {
                let message = err.to_string();
                warn!(system = %service.system, error = %message, "websocket read failed");
                service.emit(&ServiceEvent::Error(ClientError::Transport {
                    message: message.clone(),
                }));
                break (CLOSE_ABNORMAL, message);
            }
        }
    };

    if let Some(service) = inner.upgrade() {
        service.on_closed(generation, code, reason);
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
