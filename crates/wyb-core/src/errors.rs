//! Error taxonomy for the dashboard link.
//!
//! [`ClientError`] is the single error type returned by connection and request
//! operations and carried by `error` events. It is `Clone` so the most recent
//! failure can be stored on the connection and handed to every listener.
//!
//! [`ErrorKind`] is the flat, serializable classification used in logs and
//! assertions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by a dashboard service instance.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The URL was malformed or did not use `ws://` / `wss://`.
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The handshake did not complete within the connect timeout.
    #[error("connection to {url} timed out after {timeout_ms}ms")]
    ConnectTimeout {
        /// Target URL.
        url: String,
        /// How long we waited.
        timeout_ms: u64,
    },

    /// The underlying socket reported an error.
    #[error("transport error: {message}")]
    Transport {
        /// Error reported by the WebSocket layer.
        message: String,
    },

    /// The connection closed with a code other than 1000.
    #[error("connection closed uncleanly (code {code}): {reason}")]
    UncleanClose {
        /// Close code.
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },

    /// Automatic reconnection gave up.
    #[error("max reconnect attempts reached ({attempts})")]
    MaxReconnectAttempts {
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// A frame could not be sent.
    #[error("send rejected: {reason}")]
    SendRejected {
        /// Not connected, not open, or serialization failure.
        reason: String,
    },

    /// An inbound frame was not valid JSON, or a reply had the wrong shape.
    #[error("failed to decode frame: {message}")]
    Decode {
        /// Parser message.
        message: String,
        /// The offending payload.
        raw: String,
    },

    /// A listener or message handler failed. Isolated to that callback.
    #[error("handler for '{target}' failed: {message}")]
    Handler {
        /// Event name or message type the callback was registered for.
        target: String,
        /// Error or panic message.
        message: String,
    },

    /// No matching reply arrived before the request deadline.
    #[error("timed out after {timeout_ms}ms waiting for '{reply_type}'")]
    RequestTimeout {
        /// Reply type the request was waiting for.
        reply_type: String,
        /// How long we waited.
        timeout_ms: u64,
    },

    /// Caller-supplied arguments were rejected before any network activity.
    #[error("invalid argument: {0}")]
    Validation(String),

    /// A connect attempt or pending request was superseded before it settled.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// The server answered with an `error` frame.
    #[error("server error: {message}")]
    Server {
        /// Message from the server.
        message: String,
    },
}

/// Flat classification of [`ClientError`] variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// See [`ClientError::InvalidUrl`].
    InvalidUrl,
    /// See [`ClientError::ConnectTimeout`].
    ConnectTimeout,
    /// See [`ClientError::Transport`].
    Transport,
    /// See [`ClientError::UncleanClose`].
    UncleanClose,
    /// See [`ClientError::MaxReconnectAttempts`].
    MaxReconnectAttempts,
    /// See [`ClientError::SendRejected`].
    SendRejected,
    /// See [`ClientError::Decode`].
    Decode,
    /// See [`ClientError::Handler`].
    Handler,
    /// See [`ClientError::RequestTimeout`].
    RequestTimeout,
    /// See [`ClientError::Validation`].
    Validation,
    /// See [`ClientError::Cancelled`].
    Cancelled,
    /// See [`ClientError::Server`].
    Server,
}

impl ClientError {
    /// Classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidUrl { .. } => ErrorKind::InvalidUrl,
            Self::ConnectTimeout { .. } => ErrorKind::ConnectTimeout,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::UncleanClose { .. } => ErrorKind::UncleanClose,
            Self::MaxReconnectAttempts { .. } => ErrorKind::MaxReconnectAttempts,
            Self::SendRejected { .. } => ErrorKind::SendRejected,
            Self::Decode { .. } => ErrorKind::Decode,
            Self::Handler { .. } => ErrorKind::Handler,
            Self::RequestTimeout { .. } => ErrorKind::RequestTimeout,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Server { .. } => ErrorKind::Server,
        }
    }

    /// Whether the automatic reconnect loop may recover from this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout { .. } | Self::Transport { .. } | Self::UncleanClose { .. }
        )
    }

    /// Shorthand for a [`ClientError::SendRejected`].
    pub fn send_rejected(reason: impl Into<String>) -> Self {
        Self::SendRejected {
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`ClientError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// Result type for dashboard client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn invalid_url_display() {
        let err = ClientError::InvalidUrl {
            url: "http://x".into(),
            reason: "scheme must be ws or wss".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid url 'http://x': scheme must be ws or wss"
        );
    }

    #[test]
    fn request_timeout_names_reply_type() {
        let err = ClientError::RequestTimeout {
            reply_type: "client_list".into(),
            timeout_ms: 5000,
        };
        assert!(err.to_string().contains("client_list"));
        assert!(err.to_string().contains("5000ms"));
    }

    #[test]
    fn unclean_close_display() {
        let err = ClientError::UncleanClose {
            code: 1006,
            reason: "connection lost".into(),
        };
        assert_eq!(
            err.to_string(),
            "connection closed uncleanly (code 1006): connection lost"
        );
    }

    #[test]
    fn kind_maps_every_variant() {
        let cases = [
            (
                ClientError::MaxReconnectAttempts { attempts: 5 },
                ErrorKind::MaxReconnectAttempts,
            ),
            (ClientError::send_rejected("not connected"), ErrorKind::SendRejected),
            (ClientError::validation("empty"), ErrorKind::Validation),
            (ClientError::Cancelled("superseded".into()), ErrorKind::Cancelled),
            (
                ClientError::Server {
                    message: "Preset not found: x".into(),
                },
                ErrorKind::Server,
            ),
            (
                ClientError::Decode {
                    message: "eof".into(),
                    raw: "{".into(),
                },
                ErrorKind::Decode,
            ),
        ];
        for (err, kind) in cases {
            assert_eq!(err.kind(), kind, "{err}");
        }
    }

    #[test]
    fn recoverable_errors() {
        assert!(
            ClientError::Transport {
                message: "refused".into()
            }
            .is_recoverable()
        );
        assert!(
            ClientError::ConnectTimeout {
                url: "ws://x".into(),
                timeout_ms: 10
            }
            .is_recoverable()
        );
        assert!(!ClientError::validation("bad").is_recoverable());
        assert!(!ClientError::MaxReconnectAttempts { attempts: 5 }.is_recoverable());
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::MaxReconnectAttempts).unwrap();
        assert_eq!(json, r#""max_reconnect_attempts""#);
    }

    #[test]
    fn errors_are_cloneable() {
        let err = ClientError::Handler {
            target: "message".into(),
            message: "boom".into(),
        };
        let copy = err.clone();
        assert_matches!(copy, ClientError::Handler { ref target, .. } if target == "message");
        assert_eq!(err, copy);
    }
}
