use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::SettingsError;

/// File name used for the settings document inside the data directory
pub const SETTINGS_FILENAME: &str = "settings.json";

/// String-keyed settings persisted as a single JSON document.
///
/// Every `set`/`remove` rewrites the whole file through a `.partial`
/// sibling and a rename.
#[derive(Debug)]
pub struct SettingsStore {
    path: Option<PathBuf>,
    values: Mutex<Map<String, Value>>,
}

impl SettingsStore {
    /// Load settings from `path`; a missing file starts out empty
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();

        let values = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                SettingsError::JsonParseFailed {
                    path: path.clone(),
                    source: e,
                }
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(SettingsError::ReadFailed { path, source: e }),
        };

        Ok(Self {
            path: Some(path),
            values: Mutex::new(values),
        })
    }

    /// Settings that live only as long as the process
    pub fn in_memory() -> Self {
        Self {
            path: None,
            values: Mutex::new(Map::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Read and decode `key`. Absent and undecodable values both read as `None`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.values().get(key)?.clone();
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!(key, error = %e, "ignoring undecodable setting");
                None
            }
        }
    }

    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), SettingsError> {
        let value = serde_json::to_value(value)?;
        let mut values = self.values();
        values.insert(key.to_string(), value);
        self.persist(&values)
    }

    pub fn remove(&self, key: &str) -> Result<(), SettingsError> {
        let mut values = self.values();
        if values.remove(key).is_none() {
            return Ok(());
        }
        self.persist(&values)
    }

    fn values(&self) -> MutexGuard<'_, Map<String, Value>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, values: &Map<String, Value>) -> Result<(), SettingsError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let write_failed = |e| SettingsError::WriteFailed {
            path: path.clone(),
            source: e,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_failed)?;
        }

        let json = serde_json::to_string_pretty(values)?;
        let partial_path = path.with_extension("json.partial");
        std::fs::write(&partial_path, json).map_err(write_failed)?;
        std::fs::rename(&partial_path, path).map_err(write_failed)
    }
}
