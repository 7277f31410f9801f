use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::SettingsError;
use crate::store::SettingsStore;

/// Settings key holding the download index
pub const DOWNLOADS_KEY: &str = "downloadMeta";

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Serializable metadata for a downloaded episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub title: String,
    pub downloaded_at: DateTime<Utc>,
    /// Size in MiB, rounded to two decimals
    pub size_mb: f64,
    pub content_hash: String,
}

impl DownloadRecord {
    /// Create metadata for freshly downloaded bytes
    pub fn new(title: &str, data: &[u8]) -> Self {
        Self {
            title: title.to_string(),
            downloaded_at: Utc::now(),
            size_mb: size_in_mb(data.len()),
            content_hash: content_hash(data),
        }
    }
}

/// Episode id to download metadata
pub type DownloadIndex = BTreeMap<String, DownloadRecord>;

pub fn size_in_mb(bytes: usize) -> f64 {
    (bytes as f64 / BYTES_PER_MB * 100.0).round() / 100.0
}

/// `sha256:<hex>` digest of `data`
pub fn content_hash(data: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(data))
}

/// Read the download index; a missing or unreadable index is empty
pub fn read_download_index(settings: &SettingsStore) -> DownloadIndex {
    settings.get(DOWNLOADS_KEY).unwrap_or_default()
}

pub fn write_download_index(
    settings: &SettingsStore,
    index: &DownloadIndex,
) -> Result<(), SettingsError> {
    settings.set(DOWNLOADS_KEY, index)
}
