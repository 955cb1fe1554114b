//! # wyb-client
//!
//! Resilient WebSocket link between the dashboard and a display server.
//!
//! - **Lifecycle**: [`WsService::connect`] / [`WsService::disconnect`] with a
//!   connect timeout and bounded exponential reconnection
//! - **Events**: `connect`, `disconnect`, `error`, `reconnect` and `message`
//!   listeners, each isolated from the others ([`events`])
//! - **Routing**: per-`type` message handlers ([`router`])
//! - **Requests**: typed operations that pair a command with its reply type
//!   and a timeout ([`requests`])
//! - **Registry**: one independent instance per configured system
//!   ([`SystemRegistry`])

#![deny(unsafe_code)]

mod callback;
pub mod connection;
pub mod events;
pub mod probe;
pub mod registry;
pub mod requests;
pub mod router;
pub mod service;

pub use connection::{ConnectOptions, ConnectionSnapshot, ConnectionStatus, ServiceConfig};
pub use events::{EventDispatcher, EventKind, ListenerId, ServiceEvent};
pub use probe::{Probe, TcpProbe};
pub use registry::SystemRegistry;
pub use router::{HandlerId, MessageRouter};
pub use service::WsService;
