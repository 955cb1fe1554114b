//! JSON output for results and events.

use std::io::Write as _;

use serde::Serialize;
use serde_json::{Value, json};
use wyb_client::ServiceEvent;

/// Print `value` to stdout as pretty JSON.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

/// One line of `watch` output.
pub fn event_json(system: &str, event: &ServiceEvent) -> Value {
    let body = match event {
        ServiceEvent::Connected { url } => json!({ "url": url }),
        ServiceEvent::Disconnected {
            code,
            reason,
            clean,
        } => json!({ "code": code, "reason": reason, "clean": clean }),
        ServiceEvent::Error(err) => json!({ "kind": err.kind(), "message": err.to_string() }),
        ServiceEvent::Reconnecting { attempt, delay } => json!({
            "attempt": attempt,
            "delayMs": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        }),
        ServiceEvent::Message(payload) => json!({ "payload": payload }),
    };
    json!({
        "system": system,
        "event": event.kind().as_str(),
        "data": body,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use wyb_core::errors::ClientError;

    #[test]
    fn reconnect_event_in_millis() {
        let line = event_json(
            "soy",
            &ServiceEvent::Reconnecting {
                attempt: 2,
                delay: Duration::from_millis(1500),
            },
        );
        assert_eq!(
            line,
            json!({"system": "soy", "event": "reconnect", "data": {"attempt": 2, "delayMs": 1500}})
        );
    }

    #[test]
    fn error_event_carries_kind() {
        let line = event_json(
            "kandidaten",
            &ServiceEvent::Error(ClientError::MaxReconnectAttempts { attempts: 5 }),
        );
        assert_eq!(line["event"], "error");
        assert_eq!(line["data"]["kind"], "max_reconnect_attempts");
        assert_eq!(line["data"]["message"], "max reconnect attempts reached (5)");
    }

    #[test]
    fn message_event_wraps_payload() {
        let payload = json!({"type": "client_list", "clients": {}});
        let line = event_json("kandidaten", &ServiceEvent::Message(payload.clone()));
        assert_eq!(line["data"]["payload"], payload);
    }
}
