//! Wire protocol spoken with a display server.
//!
//! Every frame is a JSON text message with a mandatory `type` discriminator.
//! Outbound frames are modelled by [`Command`]; inbound frames by [`Reply`],
//! whose [`Reply::Unknown`] variant keeps unrecognized types routable.
//!
//! The protocol carries no per-request correlation id. A reply is matched to
//! a request by its `type` alone.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::errors::ClientError;

/// Well-known `type` values of inbound frames.
pub mod reply_types {
    /// Reply to `get_clients`; also broadcast unsolicited on status changes.
    pub const CLIENT_LIST: &str = "client_list";
    /// Reply to `get_presets`.
    pub const PRESET_LIST: &str = "preset_list";
    /// Reply to `update_display`.
    pub const DISPLAY_UPDATED: &str = "display_updated";
    /// Reply to `save_preset`.
    pub const PRESET_SAVED: &str = "preset_saved";
    /// Reply to `load_preset`.
    pub const PRESET_LOADED: &str = "preset_loaded";
    /// Reply to `check_presets_integrity`.
    pub const PRESETS_INTEGRITY_RESULT: &str = "presets_integrity_result";
    /// Server-side failure report.
    pub const ERROR: &str = "error";
}

// ─────────────────────────────────────────────────────────────────────────────
// Display state
// ─────────────────────────────────────────────────────────────────────────────

/// What a display client renders.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// Solid background color.
    #[default]
    Color,
    /// Full-screen image.
    Image,
}

/// Visual state pushed to one or more displays.
///
/// Absent fields are left unchanged on the display.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayState {
    /// Render mode.
    #[serde(default)]
    pub mode: DisplayMode,
    /// Background color as `#RRGGBB`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    /// Number drawn on top of the background. Numeric JSON values read as
    /// their decimal text.
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub number: Option<String>,
    /// Image URL or server-relative path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl DisplayState {
    /// Solid color display.
    pub fn color(background: impl Into<String>) -> Self {
        Self {
            mode: DisplayMode::Color,
            background: Some(background.into()),
            ..Self::default()
        }
    }

    /// Image display.
    pub fn image(image: impl Into<String>) -> Self {
        Self {
            mode: DisplayMode::Image,
            image: Some(image.into()),
            ..Self::default()
        }
    }

    /// Set the overlaid number.
    #[must_use]
    pub fn with_number(mut self, number: impl Into<String>) -> Self {
        self.number = Some(number.into());
        self
    }

    /// Check the state is renderable by a display client.
    pub fn validate(&self) -> Result<(), ClientError> {
        if let Some(background) = &self.background {
            if !is_hex_color(background) {
                return Err(ClientError::validation(format!(
                    "background must be #RRGGBB, got '{background}'"
                )));
            }
        }
        if self.mode == DisplayMode::Image
            && self.image.as_deref().is_none_or(|image| image.trim().is_empty())
        {
            return Err(ClientError::validation("image mode requires an image"));
        }
        Ok(())
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(text)) => Some(text),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}

/// Whether `value` is a `#RRGGBB` color.
pub fn is_hex_color(value: &str) -> bool {
    value.len() == 7
        && value.starts_with('#')
        && value[1..].chars().all(|c| c.is_ascii_hexdigit())
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands (outbound)
// ─────────────────────────────────────────────────────────────────────────────

/// Outbound command frames.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Ask for the client list.
    GetClients,
    /// Ask for the preset names.
    GetPresets,
    /// Push display state to the listed clients.
    UpdateDisplay {
        /// Target client ids.
        clients: Vec<String>,
        /// State to apply.
        display: DisplayState,
    },
    /// Store the current state of all clients under `name`.
    SavePreset {
        /// Preset name.
        name: String,
    },
    /// Apply the preset stored under `name`.
    LoadPreset {
        /// Preset name.
        name: String,
    },
    /// Ask the server to verify its preset file.
    CheckPresetsIntegrity,
}

impl Command {
    /// The `type` discriminator of this command.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::GetClients => "get_clients",
            Self::GetPresets => "get_presets",
            Self::UpdateDisplay { .. } => "update_display",
            Self::SavePreset { .. } => "save_preset",
            Self::LoadPreset { .. } => "load_preset",
            Self::CheckPresetsIntegrity => "check_presets_integrity",
        }
    }

    /// The reply `type` the server answers this command with.
    pub fn reply_type(&self) -> &'static str {
        match self {
            Self::GetClients => reply_types::CLIENT_LIST,
            Self::GetPresets => reply_types::PRESET_LIST,
            Self::UpdateDisplay { .. } => reply_types::DISPLAY_UPDATED,
            Self::SavePreset { .. } => reply_types::PRESET_SAVED,
            Self::LoadPreset { .. } => reply_types::PRESET_LOADED,
            Self::CheckPresetsIntegrity => reply_types::PRESETS_INTEGRITY_RESULT,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Replies (inbound)
// ─────────────────────────────────────────────────────────────────────────────

/// Liveness of a display client as tracked by the server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    /// Heartbeats arriving.
    Online,
    /// No heartbeat for a short while.
    Lost,
    /// Disconnected or silent for a long while.
    Offline,
    /// Any status this build does not know.
    #[default]
    #[serde(other)]
    Unknown,
}

/// Self-description a display client registers with.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Human-readable display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Reported address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Capabilities such as `display`, `image`, `admin`.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Fields this build does not model.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// One entry of a `client_list` reply.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientEntry {
    /// Registration info.
    #[serde(default)]
    pub info: ClientInfo,
    /// Liveness.
    #[serde(default)]
    pub status: ClientStatus,
    /// Current display state.
    #[serde(default)]
    pub display: DisplayState,
    /// ISO-8601 timestamp of the last heartbeat.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
}

impl ClientEntry {
    /// Decode one entry, keeping whatever fields are readable.
    ///
    /// A field of unexpected shape falls back to its default. `None` only
    /// when the entry is not an object at all.
    pub fn decode_lenient(id: &str, value: &Value) -> Option<Self> {
        let err = match Self::deserialize(value) {
            Ok(entry) => return Some(entry),
            Err(err) => err,
        };
        let Value::Object(fields) = value else {
            warn!(client = id, error = %err, "dropping client entry that is not an object");
            return None;
        };
        warn!(client = id, error = %err, "client entry partially malformed, keeping readable fields");
        Some(Self {
            info: field_or_default(fields, "info"),
            status: field_or_default(fields, "status"),
            display: field_or_default(fields, "display"),
            last_seen: field_or_default(fields, "last_seen"),
        })
    }
}

fn field_or_default<T: DeserializeOwned + Default>(fields: &Map<String, Value>, key: &str) -> T {
    fields
        .get(key)
        .and_then(|value| T::deserialize(value).ok())
        .unwrap_or_default()
}

fn lenient_clients<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeMap<String, ClientEntry>, D::Error> {
    let clients = match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => return Ok(BTreeMap::new()),
        Some(Value::Object(clients)) => clients,
        Some(other) => {
            warn!(found = %other, "client_list 'clients' is not an object, treating as empty");
            return Ok(BTreeMap::new());
        }
    };
    Ok(clients
        .iter()
        .filter_map(|(id, entry)| {
            ClientEntry::decode_lenient(id, entry).map(|entry| (id.clone(), entry))
        })
        .collect())
}

/// `client_list` payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientList {
    /// Client id to entry. Empty when the server omits the field or sends
    /// `null`; unreadable entries are skipped.
    #[serde(default, deserialize_with = "lenient_clients")]
    pub clients: BTreeMap<String, ClientEntry>,
    /// Name of the answering system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

/// `preset_list` payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetList {
    /// Preset names. Empty when the server omits the field.
    #[serde(default)]
    pub presets: Vec<String>,
    /// Name of the answering system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

/// `display_updated` payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayUpdated {
    /// Clients the update actually reached.
    #[serde(default)]
    pub updated_clients: Vec<String>,
}

/// `preset_saved` payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetSaved {
    /// Saved preset name.
    #[serde(default)]
    pub name: String,
    /// Name of the answering system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

/// `preset_loaded` payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetLoaded {
    /// Loaded preset name.
    #[serde(default)]
    pub name: String,
    /// Clients the preset was applied to.
    #[serde(default)]
    pub updated_clients: Vec<String>,
    /// Name of the answering system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

/// Outcome of a server-side preset file check.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrityStatus {
    /// File parsed as a preset map.
    Ok,
    /// File does not exist.
    Missing,
    /// File is blank.
    Empty,
    /// File parsed but is not a map.
    Invalid,
    /// File is not valid JSON.
    Corrupt,
    /// File could not be read.
    Error,
    /// Any status this build does not know.
    #[default]
    #[serde(other)]
    Unknown,
}

/// Body of a `presets_integrity_result` reply.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// Check outcome.
    #[serde(default)]
    pub status: IntegrityStatus,
    /// Human-readable detail.
    #[serde(default)]
    pub message: String,
    /// Preset names, present when the file is valid.
    #[serde(default)]
    pub presets: Vec<String>,
}

/// `presets_integrity_result` payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetsIntegrity {
    /// The report.
    #[serde(default)]
    pub result: IntegrityReport,
    /// Name of the answering system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

/// `error` payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// What went wrong on the server.
    #[serde(default)]
    pub message: String,
}

/// Inbound frames, discriminated by `type`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    /// `client_list`.
    ClientList(ClientList),
    /// `preset_list`.
    PresetList(PresetList),
    /// `display_updated`.
    DisplayUpdated(DisplayUpdated),
    /// `preset_saved`.
    PresetSaved(PresetSaved),
    /// `preset_loaded`.
    PresetLoaded(PresetLoaded),
    /// `presets_integrity_result`.
    PresetsIntegrityResult(PresetsIntegrity),
    /// `error`.
    Error(ServerError),
    /// Any other `type`.
    #[serde(other)]
    Unknown,
}

impl Reply {
    /// Classify a decoded frame. Frames whose known `type` carries a
    /// malformed body are reported as [`Reply::Unknown`].
    pub fn from_value(value: &Value) -> Self {
        Self::deserialize(value).unwrap_or(Self::Unknown)
    }
}

/// Read the `type` discriminator of a decoded frame.
pub fn frame_type(value: &Value) -> Option<&str> {
    value.get("type").and_then(Value::as_str)
}

/// Decode a reply payload into its typed form.
pub fn decode_reply<T: serde::de::DeserializeOwned>(
    reply_type: &str,
    value: Value,
) -> Result<T, ClientError> {
    let raw = value.to_string();
    serde_json::from_value(value).map_err(|err| ClientError::Decode {
        message: format!("malformed '{reply_type}' reply: {err}"),
        raw,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
