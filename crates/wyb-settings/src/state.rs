//! Persisted dashboard state.
//!
//! A flat JSON object of string keys to arbitrary JSON values, stored at
//! `~/.wyb/state.json`. The dashboard treats values as opaque blobs; the
//! only keys it interprets are listed in [`keys`].
//!
//! Writes go to a temp file in the same directory and are renamed into place,
//! so a crash mid-write never leaves a truncated file behind.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::errors::Result;
use crate::loader::wyb_home;

/// Well-known state keys.
pub mod keys {
    /// Name of the system used most recently.
    pub const LAST_SYSTEM: &str = "lastSystem";

    /// Key of the URL last used for `system`.
    pub fn saved_url(system: &str) -> String {
        format!("savedUrl.{system}")
    }
}

/// Resolve the path to the state file (`~/.wyb/state.json`).
pub fn state_path() -> PathBuf {
    wyb_home().join("state.json")
}

/// File-backed key-value store.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    values: Map<String, Value>,
}

impl StateStore {
    /// Open the store at the default path.
    pub fn open_default() -> Result<Self> {
        Self::open(state_path())
    }

    /// Open the store at `path`.
    ///
    /// A missing, blank, unparsable or non-object file yields an empty store;
    /// the bad file is replaced on the next write. Only I/O errors fail.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                Map::new()
            } else {
                match serde_json::from_str::<Value>(&content) {
                    Ok(Value::Object(map)) => map,
                    Ok(other) => {
                        warn!(?path, found = json_type(&other), "state file is not an object, starting empty");
                        Map::new()
                    }
                    Err(err) => {
                        warn!(?path, error = %err, "state file is corrupt, starting empty");
                        Map::new()
                    }
                }
            }
        } else {
            debug!(?path, "state file not found, starting empty");
            Map::new()
        };
        Ok(Self { path, values })
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw value under `key`.
    pub fn get_raw(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Typed value under `key`. A value of the wrong shape reads as `None`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.values.get(key)?;
        match serde_json::from_value(value.clone()) {
            Ok(v) => Some(v),
            Err(err) => {
                warn!(key, error = %err, "ignoring state value of unexpected shape");
                None
            }
        }
    }

    /// Store `value` under `key` and persist.
    pub fn set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        let _ = self.values.insert(key.to_string(), value);
        self.persist()
    }

    /// Remove `key` and persist. Returns whether it was present.
    pub fn remove(&mut self, key: &str) -> Result<bool> {
        let existed = self.values.remove(key).is_some();
        if existed {
            self.persist()?;
        }
        Ok(existed)
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn persist(&self) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, &self.values)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        let _ = tmp.persist(&self.path).map_err(|err| err.error)?;
        debug!(path = ?self.path, keys = self.values.len(), "state persisted");
        Ok(())
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
