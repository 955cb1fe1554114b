//! Lifecycle event pub/sub.
//!
//! [`EventDispatcher`] keeps an ordered list of listeners per [`EventKind`].
//! Registration returns a [`ListenerId`]; removal by id is safe at any time,
//! including from inside a listener, because [`EventDispatcher::trigger`]
//! snapshots the list before invoking anything.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};
use wyb_core::errors::ClientError;

use crate::callback::invoke_isolated;

/// Lifecycle event names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Transport opened.
    Connect,
    /// An open transport closed.
    Disconnect,
    /// Something failed; see [`ClientError`].
    Error,
    /// A reconnection was scheduled.
    Reconnect,
    /// Any decoded inbound frame.
    Message,
}

impl EventKind {
    /// Every event kind.
    pub const ALL: [Self; 5] = [
        Self::Connect,
        Self::Disconnect,
        Self::Error,
        Self::Reconnect,
        Self::Message,
    ];

    /// Wire name of the event.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Error => "error",
            Self::Reconnect => "reconnect",
            Self::Message => "message",
        }
    }

    /// Look up an event by name. Unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload delivered to listeners.
#[derive(Clone, Debug, PartialEq)]
pub enum ServiceEvent {
    /// The transport is open.
    Connected {
        /// Connected URL.
        url: String,
    },
    /// An open transport closed.
    Disconnected {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
        /// Whether the close was clean (code 1000).
        clean: bool,
    },
    /// A failure surfaced outside of any call's return value.
    Error(ClientError),
    /// A reconnection attempt has been scheduled.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
        /// Delay before the attempt fires.
        delay: Duration,
    },
    /// A decoded inbound frame.
    Message(Value),
}

impl ServiceEvent {
    /// Which listeners receive this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected { .. } => EventKind::Connect,
            Self::Disconnected { .. } => EventKind::Disconnect,
            Self::Error(_) => EventKind::Error,
            Self::Reconnecting { .. } => EventKind::Reconnect,
            Self::Message(_) => EventKind::Message,
        }
    }
}

/// Handle returned by listener registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Event listener callback.
pub type Listener = Arc<dyn Fn(&ServiceEvent) -> anyhow::Result<()> + Send + Sync>;

/// Ordered listener lists keyed by event kind.
pub struct EventDispatcher {
    listeners: Mutex<HashMap<EventKind, Vec<(ListenerId, Listener)>>>,
    next_id: AtomicU64,
}

impl EventDispatcher {
    /// Empty dispatcher.
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `listener` for `kind`. Listeners fire in registration order.
    pub fn add<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&ServiceEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Register by event name. Unknown names are ignored and yield `None`.
    pub fn add_named<F>(&self, name: &str, listener: F) -> Option<ListenerId>
    where
        F: Fn(&ServiceEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let Some(kind) = EventKind::parse(name) else {
            debug!(event = name, "ignoring listener for unknown event");
            return None;
        };
        Some(self.add(kind, listener))
    }

    /// Remove a listener. Unknown ids are ignored. Returns whether one was removed.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        for list in listeners.values_mut() {
            if let Some(pos) = list.iter().position(|(lid, _)| *lid == id) {
                let _ = list.remove(pos);
                return true;
            }
        }
        false
    }

    /// Number of listeners registered for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.lock().get(&kind).map_or(0, Vec::len)
    }

    /// Invoke every listener for the event's kind, in registration order.
    ///
    /// A failing listener is logged and skipped. Returns how many failed.
    pub fn trigger(&self, event: &ServiceEvent) -> usize {
        let kind = event.kind();
        let snapshot: Vec<Listener> = self
            .listeners
            .lock()
            .get(&kind)
            .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        let mut failures = 0;
        for listener in snapshot {
            if let Err(err) = invoke_isolated(kind.as_str(), || listener(event)) {
                failures += 1;
                warn!(event = %kind, error = %err, "event listener failed");
            }
        }
        failures
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.lock();
        let counts: HashMap<&str, usize> = listeners
            .iter()
            .map(|(kind, list)| (kind.as_str(), list.len()))
            .collect();
        f.debug_struct("EventDispatcher")
            .field("listeners", &counts)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
