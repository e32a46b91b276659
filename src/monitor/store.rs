//! Key-value JSON snapshot shared with other processes.
//!
//! The whole map is rewritten on every change through a temp file and a
//! rename, so readers never see a half-written file.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use log::warn;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use super::state::{MonitorState, StateSink};
use crate::error::{MonitorError, Result};

/// Persistent key-value snapshot.
pub struct SnapshotStore {
    path: PathBuf,
    values: RwLock<Map<String, Value>>,
}

impl SnapshotStore {
    /// Open the snapshot at `path`, loading it if present.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let values = if path.exists() {
            let content = fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                Map::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            Map::new()
        };

        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        let values = self.values.read().map_err(|e| MonitorError::Storage(e.to_string()))?;
        Ok(values.get(key).cloned())
    }

    /// Typed read; a value of the wrong shape is an error.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn set(&self, key: &str, value: impl Serialize) -> Result<()> {
        self.set_many(vec![(key.to_string(), serde_json::to_value(value)?)])
    }

    /// Apply several entries with a single write.
    pub fn set_many(&self, entries: Vec<(String, Value)>) -> Result<()> {
        let mut values = self.values.write().map_err(|e| MonitorError::Storage(e.to_string()))?;
        for (key, value) in entries {
            values.insert(key, value);
        }
        self.persist(&values)
    }

    pub fn remove(&self, key: &str) -> Result<bool> {
        let mut values = self.values.write().map_err(|e| MonitorError::Storage(e.to_string()))?;
        if values.remove(key).is_none() {
            return Ok(false);
        }
        self.persist(&values)?;
        Ok(true)
    }

    /// Copy of every stored entry.
    pub fn snapshot(&self) -> Result<Map<String, Value>> {
        let values = self.values.read().map_err(|e| MonitorError::Storage(e.to_string()))?;
        Ok(values.clone())
    }

    fn persist(&self, values: &Map<String, Value>) -> Result<()> {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, serde_json::to_vec_pretty(values)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Flattened keys written for each published state.
fn state_entries(state: &MonitorState) -> Vec<(String, Value)> {
    vec![
        ("connected".into(), json!(state.is_connected())),
        ("connection_state".into(), json!(state.connection.to_string())),
        ("status_message".into(), json!(state.status_message)),
        ("host".into(), json!(state.host)),
        ("level_db".into(), json!(state.level_db)),
        ("volume_display".into(), json!(state.volume_display())),
        ("muted".into(), json!(state.muted)),
        ("dimmed".into(), json!(state.dimmed)),
        ("mono".into(), json!(state.mono)),
        ("updated_at".into(), json!(chrono::Utc::now().to_rfc3339())),
    ]
}

impl StateSink for SnapshotStore {
    fn publish(&self, state: &MonitorState) {
        if let Err(e) = self.set_many(state_entries(state)) {
            warn!("Failed to write snapshot {}: {}", self.path.display(), e);
        }
    }
}
