// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::StorageError;

const BLOB_EXTENSION: &str = "blob";
const PARTIAL_EXTENSION: &str = "partial";

/// Size of the big-endian id length prefix in a blob record
const HEADER_LEN: usize = 4;

/// Keyed storage for audio bytes. Operations are atomic per key.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under `id`, replacing any previous value
    async fn put(&self, id: &str, data: Bytes) -> Result<(), StorageError>;

    /// Fetch the value stored under `id`
    async fn get(&self, id: &str) -> Result<Option<Bytes>, StorageError>;

    /// Remove `id`; removing an absent key succeeds
    async fn delete(&self, id: &str) -> Result<(), StorageError>;

    /// All stored ids
    async fn list_keys(&self) -> Result<BTreeSet<String>, StorageError>;
}

/// A shared reference to a blob store
pub type SharedBlobStore = Arc<dyn BlobStore>;

/// Blob store keeping one record file per id in a directory.
///
/// Record files are named after the SHA-256 of the id and start with the
/// id itself, so keys can be listed without reading the audio bytes.
pub struct FsBlobStore {
    root: PathBuf,
    opened: OnceCell<()>,
}

impl FsBlobStore {
    /// Create a store rooted at `root`. The directory is opened on first use.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            opened: OnceCell::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Open the directory once: create it and drop leftovers of interrupted writes
    async fn dir(&self) -> Result<&Path, StorageError> {
        self.opened
            .get_or_try_init(|| open_dir(&self.root))
            .await?;
        Ok(&self.root)
    }

    async fn record_path(&self, id: &str) -> Result<PathBuf, StorageError> {
        Ok(self.dir().await?.join(record_filename(id)))
    }
}

async fn open_dir(root: &Path) -> Result<(), StorageError> {
    let open_failed = |e| StorageError::OpenFailed {
        path: root.to_path_buf(),
        source: e,
    };

    tokio::fs::create_dir_all(root).await.map_err(open_failed)?;

    let mut partial_files_cleaned = 0;
    let mut entries = tokio::fs::read_dir(root).await.map_err(open_failed)?;
    while let Some(entry) = entries.next_entry().await.map_err(open_failed)? {
        let path = entry.path();
        if has_extension(&path, PARTIAL_EXTENSION) && tokio::fs::remove_file(&path).await.is_ok()
        {
            partial_files_cleaned += 1;
        }
    }

    debug!(root = %root.display(), partial_files_cleaned, "blob store opened");
    Ok(())
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(extension)
}

fn record_filename(id: &str) -> String {
    format!("{:x}.{}", Sha256::digest(id.as_bytes()), BLOB_EXTENSION)
}

fn encode_record(id: &str, data: &[u8]) -> Vec<u8> {
    let id_bytes = id.as_bytes();
    let mut record = Vec::with_capacity(HEADER_LEN + id_bytes.len() + data.len());
    record.extend_from_slice(&(id_bytes.len() as u32).to_be_bytes());
    record.extend_from_slice(id_bytes);
    record.extend_from_slice(data);
    record
}

/// Split a record into its id and the offset where the data starts
fn decode_header(path: &Path, record: &[u8]) -> Result<(String, usize), StorageError> {
    let corrupt = |reason: &str| StorageError::Corrupt {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let len_bytes: [u8; HEADER_LEN] = record
        .get(..HEADER_LEN)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| corrupt("missing header"))?;
    let id_len = u32::from_be_bytes(len_bytes) as usize;
    let id_bytes = record
        .get(HEADER_LEN..HEADER_LEN + id_len)
        .ok_or_else(|| corrupt("truncated id"))?;
    let id = String::from_utf8(id_bytes.to_vec()).map_err(|_| corrupt("id is not UTF-8"))?;

    Ok((id, HEADER_LEN + id_len))
}

/// Read only the id header of a record file
async fn read_record_id(path: &Path) -> Result<String, StorageError> {
    let read_failed = |e| StorageError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    };

    let mut file = tokio::fs::File::open(path).await.map_err(read_failed)?;
    let file_len = file.metadata().await.map_err(read_failed)?.len();
    let mut len_bytes = [0u8; HEADER_LEN];
    file.read_exact(&mut len_bytes).await.map_err(read_failed)?;

    let id_len = u64::from(u32::from_be_bytes(len_bytes));
    if id_len > file_len.saturating_sub(HEADER_LEN as u64) {
        return Err(StorageError::Corrupt {
            path: path.to_path_buf(),
            reason: "truncated id".to_string(),
        });
    }

    let mut id_bytes = vec![0u8; id_len as usize];
    file.read_exact(&mut id_bytes).await.map_err(read_failed)?;

    String::from_utf8(id_bytes).map_err(|_| StorageError::Corrupt {
        path: path.to_path_buf(),
        reason: "id is not UTF-8".to_string(),
    })
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, id: &str, data: Bytes) -> Result<(), StorageError> {
        let path = self.record_path(id).await?;
        let partial_path = path.with_extension(PARTIAL_EXTENSION);
        let write_failed = |e| StorageError::WriteFailed {
            path: path.clone(),
            source: e,
        };

        tokio::fs::write(&partial_path, encode_record(id, &data))
            .await
            .map_err(write_failed)?;
        tokio::fs::rename(&partial_path, &path)
            .await
            .map_err(write_failed)?;

        debug!(id, bytes = data.len(), "blob stored");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Bytes>, StorageError> {
        let path = self.record_path(id).await?;

        let record = match tokio::fs::read(&path).await {
            Ok(record) => Bytes::from(record),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::ReadFailed { path, source: e }),
        };

        let (stored_id, offset) = decode_header(&path, &record)?;
        if stored_id != id {
            return Err(StorageError::Corrupt {
                path,
                reason: format!("record belongs to '{stored_id}'"),
            });
        }

        Ok(Some(record.slice(offset..)))
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        let path = self.record_path(id).await?;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(id, "blob deleted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteFailed { path, source: e }),
        }
    }

    async fn list_keys(&self) -> Result<BTreeSet<String>, StorageError> {
        let root = self.dir().await?;
        let read_failed = |e| StorageError::ReadFailed {
            path: root.to_path_buf(),
            source: e,
        };

        let mut keys = BTreeSet::new();
        let mut entries = tokio::fs::read_dir(root).await.map_err(read_failed)?;
        while let Some(entry) = entries.next_entry().await.map_err(read_failed)? {
            let path = entry.path();
            if !has_extension(&path, BLOB_EXTENSION) {
                continue;
            }
            // One damaged record must not hide the others
            match read_record_id(&path).await {
                Ok(id) => {
                    keys.insert(id);
                }
                Err(e) => warn!(error = %e, "skipping unreadable blob record"),
            }
        }

        Ok(keys)
    }
}

/// Blob store held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<BTreeMap<String, Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new MemoryBlobStore wrapped in an Arc
    pub fn shared() -> SharedBlobStore {
        Arc::new(Self::new())
    }

    fn blobs(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Bytes>> {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, id: &str, data: Bytes) -> Result<(), StorageError> {
        self.blobs().insert(id.to_string(), data);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Bytes>, StorageError> {
        Ok(self.blobs().get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        self.blobs().remove(id);
        Ok(())
    }

    async fn list_keys(&self) -> Result<BTreeSet<String>, StorageError> {
        Ok(self.blobs().keys().cloned().collect())
    }
}
