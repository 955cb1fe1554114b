//! Request/response correlation and the typed dashboard operations.
//!
//! The wire protocol has no request ids. A request registers a one-shot
//! handler for its reply type and takes the next frame of that type; with
//! several same-type requests in flight, replies are handed out in
//! registration order.

use std::collections::BTreeMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use wyb_core::errors::{ClientError, Result};
use wyb_core::protocol::{
    ClientEntry, ClientList, Command, DisplayState, DisplayUpdated, IntegrityReport, PresetList,
    PresetLoaded, PresetSaved, PresetsIntegrity, decode_reply,
};

use crate::router::{HandlerId, MessageRouter};
use crate::service::WsService;

/// How long a reply that beat the deadline to the handler table may take to
/// arrive.
const REPLY_GRACE: Duration = Duration::from_millis(100);

/// Deregisters the reply handler when the request settles or is dropped.
struct PendingRequest<'a> {
    router: &'a MessageRouter,
    id: HandlerId,
}

impl PendingRequest<'_> {
    /// Remove the handler now. `false` means a reply already took it.
    fn cancel(&self) -> bool {
        self.router.remove(self.id)
    }
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        let _ = self.router.remove(self.id);
    }
}

impl WsService {
    /// Send `command` and wait for the next frame of its reply type.
    ///
    /// `timeout` defaults to the configured request timeout. On timeout the
    /// reply handler is removed before the error is returned.
    pub async fn request(&self, command: &Command, timeout: Option<Duration>) -> Result<Value> {
        let reply_type = command.reply_type();
        let timeout = timeout.unwrap_or(self.inner.config.request_timeout);

        let (tx, mut rx) = oneshot::channel::<Value>();
        let slot = Mutex::new(Some(tx));
        let id = self.inner.router.once(reply_type, move |value| {
            if let Some(tx) = slot.lock().take() {
                let _ = tx.send(value.clone());
            }
            Ok(())
        });
        let pending = PendingRequest {
            router: &self.inner.router,
            id,
        };

        self.send(command)?;
        debug!(system = %self.system(), command = command.type_name(), reply_type, "request sent");

        let outcome = tokio::time::timeout(timeout, &mut rx).await;
        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(ClientError::Cancelled(format!(
                "reply handler for '{reply_type}' dropped"
            ))),
            Err(_) => {
                let timed_out = ClientError::RequestTimeout {
                    reply_type: reply_type.to_string(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                };
                if pending.cancel() {
                    warn!(system = %self.system(), reply_type, "request timed out");
                    return Err(timed_out);
                }
                await_dispatched_reply(rx, timed_out).await
            }
        }
    }

    /// All display clients known to the server, keyed by id.
    ///
    /// A reply without a `clients` field, or with `null`, yields an empty map.
    /// Entries of unexpected shape are decoded field by field.
    pub async fn get_clients(
        &self,
        timeout: Option<Duration>,
    ) -> Result<BTreeMap<String, ClientEntry>> {
        let command = Command::GetClients;
        let value = self.request(&command, timeout).await?;
        let list: ClientList = decode_reply(command.reply_type(), value)?;
        Ok(list.clients)
    }

    /// Names of the saved presets.
    pub async fn get_presets(&self, timeout: Option<Duration>) -> Result<Vec<String>> {
        let command = Command::GetPresets;
        let value = self.request(&command, timeout).await?;
        let list: PresetList = decode_reply(command.reply_type(), value)?;
        Ok(list.presets)
    }

    /// Push `display` to the listed clients.
    pub async fn update_display<I, S>(
        &self,
        client_ids: I,
        display: &DisplayState,
        timeout: Option<Duration>,
    ) -> Result<DisplayUpdated>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let clients: Vec<String> = client_ids.into_iter().map(Into::into).collect();
        validate_client_ids(&clients)?;
        display.validate()?;

        let command = Command::UpdateDisplay {
            clients,
            display: display.clone(),
        };
        let value = self.request(&command, timeout).await?;
        decode_reply(command.reply_type(), value)
    }

    /// Save the current state of every client under `name`.
    pub async fn save_preset(&self, name: &str, timeout: Option<Duration>) -> Result<PresetSaved> {
        let command = Command::SavePreset {
            name: validate_preset_name(name)?,
        };
        let value = self.request(&command, timeout).await?;
        decode_reply(command.reply_type(), value)
    }

    /// Apply the preset stored under `name`.
    pub async fn load_preset(&self, name: &str, timeout: Option<Duration>) -> Result<PresetLoaded> {
        let command = Command::LoadPreset {
            name: validate_preset_name(name)?,
        };
        let value = self.request(&command, timeout).await?;
        decode_reply(command.reply_type(), value)
    }

    /// Ask the server to verify its preset file.
    pub async fn check_presets_integrity(
        &self,
        timeout: Option<Duration>,
    ) -> Result<IntegrityReport> {
        let command = Command::CheckPresetsIntegrity;
        let value = self.request(&command, timeout).await?;
        let integrity: PresetsIntegrity = decode_reply(command.reply_type(), value)?;
        Ok(integrity.result)
    }
}

/// The handler was taken for dispatch before the deadline fired; the reply is
/// in flight on the reader task.
async fn await_dispatched_reply(
    rx: oneshot::Receiver<Value>,
    timed_out: ClientError,
) -> Result<Value> {
    match tokio::time::timeout(REPLY_GRACE, rx).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(_)) | Err(_) => Err(timed_out),
    }
}

fn validate_client_ids(ids: &[String]) -> Result<()> {
    if ids.is_empty() {
        return Err(ClientError::validation("at least one client id is required"));
    }
    if ids.iter().any(|id| id.trim().is_empty()) {
        return Err(ClientError::validation("client ids must not be blank"));
    }
    Ok(())
}

fn validate_preset_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ClientError::validation("preset name must not be blank"));
    }
    Ok(trimmed.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ServiceConfig;
    use assert_matches::assert_matches;

    fn service() -> WsService {
        WsService::new("test", ServiceConfig::default())
    }

    #[test]
    fn client_id_validation() {
        assert!(validate_client_ids(&["a".into()]).is_ok());
        assert_matches!(validate_client_ids(&[]), Err(ClientError::Validation(_)));
        assert_matches!(
            validate_client_ids(&["a".into(), "  ".into()]),
            Err(ClientError::Validation(_))
        );
    }

    #[test]
    fn preset_name_is_trimmed() {
        assert_eq!(validate_preset_name("  intro ").unwrap(), "intro");
        assert_matches!(validate_preset_name(" \t"), Err(ClientError::Validation(_)));
    }

    #[tokio::test]
    async fn send_failure_leaves_no_handler() {
        let service = service();
        let err = service.get_clients(None).await.unwrap_err();
        assert_matches!(err, ClientError::SendRejected { .. });
        assert_eq!(service.handler_count("client_list"), 0);
    }

    #[tokio::test]
    async fn invalid_display_is_rejected_before_sending() {
        let service = service();
        let err = service
            .update_display(["a"], &DisplayState::color("red"), None)
            .await
            .unwrap_err();
        assert_matches!(err, ClientError::Validation(_));

        let err = service
            .update_display(Vec::<String>::new(), &DisplayState::color("#000000"), None)
            .await
            .unwrap_err();
        assert_matches!(err, ClientError::Validation(_));
        assert_eq!(service.handler_count("display_updated"), 0);
    }

    #[tokio::test]
    async fn blank_preset_name_is_rejected() {
        let service = service();
        assert_matches!(
            service.save_preset("   ", None).await,
            Err(ClientError::Validation(_))
        );
        assert_matches!(
            service.load_preset("", None).await,
            Err(ClientError::Validation(_))
        );
        assert_eq!(service.handler_count("preset_saved"), 0);
    }

    #[tokio::test]
    async fn reply_taken_at_the_deadline_is_still_delivered() {
        let service = service();
        let router = &service.inner.router;
        let (tx, rx) = oneshot::channel::<Value>();
        let slot = Mutex::new(Some(tx));
        let id = router.once("client_list", move |value| {
            if let Some(tx) = slot.lock().take() {
                let _ = tx.send(value.clone());
            }
            Ok(())
        });
        let pending = PendingRequest { router, id };

        // The reader takes the handler just before the deadline and runs it late.
        let handlers = router.take_for_dispatch("client_list");
        assert_eq!(handlers.len(), 1);
        let delivery = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            for handler in handlers {
                handler(&serde_json::json!({"type": "client_list", "clients": {}})).unwrap();
            }
        });

        assert!(!pending.cancel());
        let timed_out = ClientError::RequestTimeout {
            reply_type: "client_list".into(),
            timeout_ms: 10,
        };
        let value = await_dispatched_reply(rx, timed_out).await.unwrap();
        assert_eq!(value["type"], "client_list");
        delivery.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_reply_handler_reports_timeout() {
        let (tx, rx) = oneshot::channel::<Value>();
        drop(tx);
        let timed_out = ClientError::RequestTimeout {
            reply_type: "preset_list".into(),
            timeout_ms: 10,
        };
        assert_matches!(
            await_dispatched_reply(rx, timed_out).await,
            Err(ClientError::RequestTimeout { .. })
        );
    }

    #[tokio::test]
    async fn dropped_request_deregisters_handler() {
        let service = service();
        let pending = PendingRequest {
            router: &service.inner.router,
            id: service.inner.router.once("preset_list", |_| Ok(())),
        };
        assert_eq!(service.handler_count("preset_list"), 1);
        drop(pending);
        assert_eq!(service.handler_count("preset_list"), 0);
    }
}
