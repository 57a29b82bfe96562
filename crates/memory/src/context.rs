//! Context store — a small key/value JSON file.
//!
//! Shape on disk: `{key: {"value": …, "updated": rfc3339}}`. The file is
//! read and written whole; non-atomic writes are acceptable at this scale.

use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

use blackroad_core::JournalError;

pub struct ContextStore {
    path: PathBuf,
}

impl ContextStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole store. An absent file is an empty store.
    pub fn snapshot(&self) -> Result<Map<String, Value>, JournalError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str::<Value>(&content) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(_) | Err(_) => {
                    tracing::warn!(path = %self.path.display(), "Ignoring malformed context file");
                    Ok(Map::new())
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(JournalError::Storage(e.to_string())),
        }
    }

    /// Get a single value.
    pub fn get(&self, key: &str) -> Result<Option<Value>, JournalError> {
        let map = self.snapshot()?;
        Ok(map
            .get(key)
            .and_then(|entry| entry.get("value"))
            .cloned())
    }

    /// Set a single value, stamping the update time.
    pub fn set(&self, key: &str, value: Value) -> Result<(), JournalError> {
        let mut map = self.snapshot()?;

        let mut entry = Map::new();
        entry.insert("value".into(), value);
        entry.insert(
            "updated".into(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        map.insert(key.to_string(), Value::Object(entry));

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| JournalError::Storage(e.to_string()))?;
        }
        let content = serde_json::to_string_pretty(&Value::Object(map))?;
        std::fs::write(&self.path, content).map_err(|e| JournalError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Number of keys currently stored.
    pub fn key_count(&self) -> usize {
        self.snapshot().map(|m| m.len()).unwrap_or(0)
    }
}
