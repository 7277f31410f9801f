mod manager;
mod metadata;

pub use manager::{DownloadManager, DownloadOutcome, ReconcileReport};
pub use metadata::{
    DOWNLOADS_KEY, DownloadIndex, DownloadRecord, content_hash, read_download_index, size_in_mb,
    write_download_index,
};
