//! In-process display server and event helpers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{WebSocketStream, accept_async};
use wyb_client::{EventKind, ServiceConfig, ServiceEvent, WsService};
use wyb_core::backoff::BackoffPolicy;

/// What the server does in response to a frame, or on a push.
#[derive(Clone, Debug)]
pub enum Action {
    /// Send a JSON frame.
    Reply(Value),
    /// Send raw text.
    Raw(String),
    /// Send a close frame with this code and hang up.
    Close(u16),
    /// Drop the TCP connection without a close frame.
    Hangup,
    /// Do nothing.
    Ignore,
}

/// Maps each received frame to the actions to take.
pub type Responder = Arc<dyn Fn(&Value) -> Vec<Action> + Send + Sync>;

/// A WebSocket server on `127.0.0.1:0`.
pub struct MockServer {
    pub url: String,
    connections: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<Value>>>,
    push: broadcast::Sender<Action>,
    accept_task: JoinHandle<()>,
}

impl MockServer {
    pub async fn start(responder: Responder) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));
        let (push, _) = broadcast::channel(16);

        let accept_task = {
            let connections = Arc::clone(&connections);
            let received = Arc::clone(&received);
            let push = push.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let _ = connections.fetch_add(1, Ordering::SeqCst);
                    let _ = tokio::spawn(serve(
                        stream,
                        Arc::clone(&responder),
                        Arc::clone(&received),
                        push.subscribe(),
                    ));
                }
            })
        };

        Self {
            url: format!("ws://{addr}"),
            connections,
            received,
            push,
            accept_task,
        }
    }

    /// Server speaking the display protocol.
    pub async fn protocol() -> Self {
        Self::start(protocol_responder()).await
    }

    /// Server that never answers.
    pub async fn silent() -> Self {
        Self::start(Arc::new(|_: &Value| vec![Action::Ignore])).await
    }

    /// TCP connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Frames received from clients, in order.
    pub fn received(&self) -> Vec<Value> {
        self.received.lock().clone()
    }

    /// Run `action` on every open connection.
    pub fn push(&self, action: Action) {
        let _ = self.push.send(action);
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve(
    stream: TcpStream,
    responder: Responder,
    received: Arc<Mutex<Vec<Value>>>,
    mut pushes: broadcast::Receiver<Action>,
) {
    let Ok(mut ws) = accept_async(stream).await else {
        return;
    };
    loop {
        tokio::select! {
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let value: Value = serde_json::from_str(text.as_str()).unwrap_or(Value::Null);
                    received.lock().push(value.clone());
                    for action in responder(&value) {
                        if !apply(&mut ws, action).await {
                            return;
                        }
                    }
                }
                Some(Ok(Message::Close(_)) | Err(_)) | None => return,
                Some(Ok(_)) => {}
            },
            pushed = pushes.recv() => match pushed {
                Ok(action) => {
                    if !apply(&mut ws, action).await {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return,
            },
        }
    }
}

/// Returns whether the connection stays open.
async fn apply(ws: &mut WebSocketStream<TcpStream>, action: Action) -> bool {
    match action {
        Action::Reply(value) => ws.send(Message::Text(value.to_string().into())).await.is_ok(),
        Action::Raw(text) => ws.send(Message::Text(text.into())).await.is_ok(),
        Action::Close(code) => {
            let frame = CloseFrame {
                code: CloseCode::from(code),
                reason: "server closing".into(),
            };
            let _ = ws.send(Message::Close(Some(frame))).await;
            false
        }
        Action::Hangup => false,
        Action::Ignore => true,
    }
}

/// Answers every command the way a display server does.
pub fn protocol_responder() -> Responder {
    Arc::new(|frame: &Value| {
        let reply = match frame["type"].as_str() {
            Some("get_clients") => json!({
                "type": "client_list",
                "system": "kandidaten",
                "clients": {
                    "display-1": {
                        "info": {"name": "KandidaatDisplay-1", "ip": "10.0.0.21", "capabilities": ["display"]},
                        "status": "online",
                        "display": {"mode": "color", "background": "#000000", "number": "1"}
                    },
                    "display-2": {
                        "info": {"name": "KandidaatDisplay-2", "capabilities": ["display", "image"]},
                        "status": "lost",
                        "display": {"mode": "image", "image": "/static/logo.png"}
                    }
                }
            }),
            Some("get_presets") => json!({"type": "preset_list", "presets": ["intro", "finale"]}),
            Some("update_display") => json!({
                "type": "display_updated",
                "updated_clients": frame["clients"].clone(),
            }),
            Some("save_preset") => json!({"type": "preset_saved", "name": frame["name"].clone()}),
            Some("load_preset") if frame["name"] == "intro" => json!({
                "type": "preset_loaded",
                "name": "intro",
                "updated_clients": ["display-1", "display-2"],
            }),
            Some("load_preset") => json!({
                "type": "error",
                "message": format!("Preset not found: {}", frame["name"].as_str().unwrap_or_default()),
            }),
            Some("check_presets_integrity") => json!({
                "type": "presets_integrity_result",
                "result": {"status": "ok", "message": "2 presets", "presets": ["intro", "finale"]},
            }),
            _ => return vec![Action::Ignore],
        };
        vec![Action::Reply(reply)]
    })
}

/// URL of a port nothing listens on.
pub async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{addr}")
}

/// Short timeouts and a fast reconnection schedule.
pub fn fast_config() -> ServiceConfig {
    ServiceConfig {
        connect_timeout: Duration::from_secs(2),
        request_timeout: Duration::from_millis(500),
        backoff: BackoffPolicy {
            max_attempts: 5,
            base_delay_ms: 20,
            multiplier: 1.5,
            max_delay_ms: 200,
        },
    }
}

pub fn fast_service() -> WsService {
    WsService::new("test", fast_config())
}

/// Records every event a service emits.
#[derive(Clone)]
pub struct Recorder {
    events: Arc<Mutex<Vec<ServiceEvent>>>,
}

impl Recorder {
    pub fn attach(service: &WsService) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        for kind in EventKind::ALL {
            let sink = Arc::clone(&events);
            let _ = service.on(kind, move |event| {
                sink.lock().push(event.clone());
                Ok(())
            });
        }
        Self { events }
    }

    pub fn events(&self) -> Vec<ServiceEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, matches: impl Fn(&ServiceEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| matches(e)).count()
    }

    /// Wait until at least `n` recorded events satisfy `matches`.
    pub async fn wait_for(&self, n: usize, matches: impl Fn(&ServiceEvent) -> bool) -> bool {
        eventually(Duration::from_secs(3), || self.count(&matches) >= n).await
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
