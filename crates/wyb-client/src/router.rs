//! Inbound frame routing.
//!
//! Handlers are registered per message `type`. Persistent handlers fire on
//! every matching frame; one-shot handlers fire once and are removed under the
//! table lock before they run, so a second frame can never reach them.
//!
//! When several one-shot handlers wait on the same type, only the oldest is
//! taken per frame. This is how concurrent same-type requests resolve in
//! reply arrival order.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};
use wyb_core::errors::ClientError;
use wyb_core::protocol::{Reply, frame_type, reply_types};

use crate::callback::invoke_isolated;
use crate::events::{EventDispatcher, ServiceEvent};

/// Handle returned by handler registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Message handler callback.
pub type Handler = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

struct Registration {
    id: HandlerId,
    once: bool,
    handler: Handler,
}

/// Per-type handler lists plus the routing step.
pub struct MessageRouter {
    handlers: Mutex<HashMap<String, Vec<Registration>>>,
    next_id: AtomicU64,
}

impl MessageRouter {
    /// Empty router.
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler that fires on every frame of `message_type`.
    pub fn on<F>(&self, message_type: &str, handler: F) -> HandlerId
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert(message_type, false, Arc::new(handler))
    }

    /// Register a handler that fires on the next frame of `message_type` only.
    pub fn once<F>(&self, message_type: &str, handler: F) -> HandlerId
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert(message_type, true, Arc::new(handler))
    }

    fn insert(&self, message_type: &str, once: bool, handler: Handler) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .entry(message_type.to_string())
            .or_default()
            .push(Registration { id, once, handler });
        id
    }

    /// Remove a handler. Returns whether it was still registered.
    pub fn remove(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock();
        let mut found = None;
        for (message_type, list) in handlers.iter_mut() {
            if let Some(pos) = list.iter().position(|r| r.id == id) {
                let _ = list.remove(pos);
                found = Some((message_type.clone(), list.is_empty()));
                break;
            }
        }
        match found {
            Some((message_type, emptied)) => {
                if emptied {
                    let _ = handlers.remove(&message_type);
                }
                true
            }
            None => false,
        }
    }

    /// Number of handlers (persistent and one-shot) for `message_type`.
    pub fn handler_count(&self, message_type: &str) -> usize {
        self.handlers.lock().get(message_type).map_or(0, Vec::len)
    }

    /// Handlers to run for one frame, in registration order.
    ///
    /// The oldest one-shot handler is removed from the table before returning.
    pub(crate) fn take_for_dispatch(&self, message_type: &str) -> Vec<Handler> {
        let mut handlers = self.handlers.lock();
        let Some(list) = handlers.get_mut(message_type) else {
            return Vec::new();
        };

        let mut selected = Vec::with_capacity(list.len());
        let mut taken_once = false;
        list.retain(|registration| {
            if !registration.once {
                selected.push(Arc::clone(&registration.handler));
                return true;
            }
            if taken_once {
                return true;
            }
            taken_once = true;
            selected.push(Arc::clone(&registration.handler));
            false
        });

        if list.is_empty() {
            let _ = handlers.remove(message_type);
        }
        selected
    }

    /// Decode one text frame and dispatch it.
    ///
    /// A frame that is not JSON raises an `error` event carrying the raw text
    /// and reaches neither type handlers nor `message` listeners. Otherwise
    /// handlers for its `type` run in order, each isolated, followed by the
    /// `message` event with the whole payload.
    pub fn route(&self, system: &str, raw: &str, events: &EventDispatcher) {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(err) => {
                warn!(system, error = %err, "dropping undecodable frame");
                let _ = events.trigger(&ServiceEvent::Error(ClientError::Decode {
                    message: err.to_string(),
                    raw: raw.to_string(),
                }));
                return;
            }
        };

        if let Some(message_type) = frame_type(&value) {
            let handlers = self.take_for_dispatch(message_type);
            debug!(system, message_type, handlers = handlers.len(), "routing frame");
            for handler in handlers {
                if let Err(err) = invoke_isolated(message_type, || handler(&value)) {
                    warn!(system, message_type, error = %err, "message handler failed");
                    let _ = events.trigger(&ServiceEvent::Error(err));
                }
            }

            if message_type == reply_types::ERROR {
                if let Reply::Error(server) = Reply::from_value(&value) {
                    warn!(system, message = %server.message, "server reported an error");
                    let _ = events.trigger(&ServiceEvent::Error(ClientError::Server {
                        message: server.message,
                    }));
                }
            }
        } else {
            debug!(system, "frame without a type, skipping handlers");
        }

        let _ = events.trigger(&ServiceEvent::Message(value));
    }
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.lock();
        let counts: HashMap<&str, usize> = handlers
            .iter()
            .map(|(message_type, list)| (message_type.as_str(), list.len()))
            .collect();
        f.debug_struct("MessageRouter")
            .field("handlers", &counts)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn capture_events(events: &EventDispatcher, kind: EventKind) -> Arc<Mutex<Vec<ServiceEvent>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let _ = events.add(kind, move |event| {
            sink.lock().push(event.clone());
            Ok(())
        });
        log
    }

    fn tagger(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> impl Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static {
        let log = Arc::clone(log);
        move |_| {
            log.lock().push(tag.to_string());
            Ok(())
        }
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let router = MessageRouter::new();
        let events = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _ = router.on("client_list", tagger(&log, "a"));
        let _ = router.on("client_list", tagger(&log, "b"));
        let _ = router.on("preset_list", tagger(&log, "other"));

        router.route("test", r#"{"type":"client_list","clients":{}}"#, &events);
        assert_eq!(*log.lock(), vec!["a", "b"]);
    }

    #[test]
    fn message_event_fires_after_handlers() {
        let router = MessageRouter::new();
        let events = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _ = router.on("preset_list", tagger(&log, "handler"));
        let sink = Arc::clone(&log);
        let _ = events.add(EventKind::Message, move |event| {
            assert_matches!(event, ServiceEvent::Message(v) if v["type"] == "preset_list");
            sink.lock().push("message".to_string());
            Ok(())
        });

        router.route("test", r#"{"type":"preset_list","presets":[]}"#, &events);
        assert_eq!(*log.lock(), vec!["handler", "message"]);
    }

    #[test]
    fn unknown_type_still_reaches_message_listeners() {
        let router = MessageRouter::new();
        let events = EventDispatcher::new();
        let messages = capture_events(&events, EventKind::Message);

        router.route("test", r#"{"type":"heartbeat_ack"}"#, &events);
        router.route("test", r#"{"no_type":true}"#, &events);
        assert_eq!(messages.lock().len(), 2);
    }

    #[test]
    fn once_handler_fires_once() {
        let router = MessageRouter::new();
        let events = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _ = router.once("preset_saved", tagger(&log, "once"));
        assert_eq!(router.handler_count("preset_saved"), 1);

        router.route("test", r#"{"type":"preset_saved","name":"a"}"#, &events);
        router.route("test", r#"{"type":"preset_saved","name":"a"}"#, &events);
        assert_eq!(log.lock().len(), 1);
        assert_eq!(router.handler_count("preset_saved"), 0);
    }

    #[test]
    fn one_frame_takes_only_the_oldest_once_handler() {
        let router = MessageRouter::new();
        let events = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _ = router.on("preset_list", tagger(&log, "persistent"));
        let _ = router.once("preset_list", tagger(&log, "first"));
        let _ = router.once("preset_list", tagger(&log, "second"));

        router.route("test", r#"{"type":"preset_list"}"#, &events);
        assert_eq!(*log.lock(), vec!["persistent", "first"]);
        assert_eq!(router.handler_count("preset_list"), 2);

        router.route("test", r#"{"type":"preset_list"}"#, &events);
        assert_eq!(*log.lock(), vec!["persistent", "first", "persistent", "second"]);
        assert_eq!(router.handler_count("preset_list"), 1);
    }

    #[test]
    fn malformed_frame_raises_decode_error_only() {
        let router = MessageRouter::new();
        let events = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _ = router.on("client_list", tagger(&log, "handler"));
        let errors = capture_events(&events, EventKind::Error);
        let messages = capture_events(&events, EventKind::Message);

        router.route("test", "{not json", &events);

        assert!(log.lock().is_empty());
        assert!(messages.lock().is_empty());
        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert_matches!(
            &errors[0],
            ServiceEvent::Error(ClientError::Decode { raw, .. }) if raw == "{not json"
        );
    }

    #[test]
    fn failing_handler_is_isolated() {
        let router = MessageRouter::new();
        let events = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _ = router.on("display_updated", |_| anyhow::bail!("bad"));
        let _ = router.on("display_updated", |_| panic!("worse"));
        let _ = router.on("display_updated", tagger(&log, "survivor"));
        let errors = capture_events(&events, EventKind::Error);
        let messages = capture_events(&events, EventKind::Message);

        router.route("test", r#"{"type":"display_updated"}"#, &events);

        assert_eq!(*log.lock(), vec!["survivor"]);
        assert_eq!(messages.lock().len(), 1);
        let errors = errors.lock();
        assert_eq!(errors.len(), 2);
        for event in errors.iter() {
            assert_matches!(
                event,
                ServiceEvent::Error(ClientError::Handler { target, .. }) if target == "display_updated"
            );
        }
    }

    #[test]
    fn server_error_frame_raises_error_event() {
        let router = MessageRouter::new();
        let events = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _ = router.on("error", tagger(&log, "error-handler"));
        let errors = capture_events(&events, EventKind::Error);

        router.route(
            "test",
            r#"{"type":"error","message":"Preset not found: intro"}"#,
            &events,
        );

        assert_eq!(*log.lock(), vec!["error-handler"]);
        let errors = errors.lock();
        assert_matches!(
            &errors[..],
            [ServiceEvent::Error(ClientError::Server { message })] if message == "Preset not found: intro"
        );
    }

    #[test]
    fn remove_handler() {
        let router = MessageRouter::new();
        let events = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let id = router.on("client_list", tagger(&log, "gone"));

        assert!(router.remove(id));
        assert!(!router.remove(id));
        assert_eq!(router.handler_count("client_list"), 0);
        router.route("test", r#"{"type":"client_list"}"#, &events);
        assert!(log.lock().is_empty());
    }
}
