use std::sync::Arc;

use crate::feed::FeedOrigin;

/// Events emitted while loading the feed and managing downloads
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Feed is being fetched from URL
    FetchingFeed { url: String },

    /// One endpoint in the fallback chain failed; the next one will be tried
    AttemptFailed {
        url: String,
        endpoint: String,
        error: String,
    },

    /// The episode list is available
    FeedLoaded {
        episode_count: usize,
        origin: FeedOrigin,
    },

    /// A download is starting
    DownloadStarting {
        episode_id: String,
        episode_title: String,
    },

    /// Download progress update
    DownloadProgress {
        episode_id: String,
        bytes_downloaded: u64,
        total_bytes: Option<u64>,
    },

    /// A download completed and was stored
    DownloadCompleted {
        episode_id: String,
        episode_title: String,
        bytes_downloaded: u64,
    },

    /// A download failed
    DownloadFailed {
        episode_id: String,
        episode_title: String,
        error: String,
    },

    /// A downloaded episode was removed from local storage
    DownloadRemoved {
        episode_id: String,
        episode_title: String,
    },

    /// Download metadata and stored blobs were brought back in sync
    Reconciled {
        orphaned_metadata: usize,
        orphaned_blobs: usize,
    },
}

/// Trait for reporting progress events.
///
/// Implementations can use this to display progress bars, log messages,
/// or collect statistics.
pub trait ProgressReporter: Send + Sync {
    /// Report a progress event
    fn report(&self, event: ProgressEvent);
}

/// A shared reference to a progress reporter
pub type SharedProgressReporter = Arc<dyn ProgressReporter>;

/// A no-op progress reporter that silently ignores all events.
/// Useful for tests or quiet mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: ProgressEvent) {}
}

impl NoopReporter {
    /// Create a new NoopReporter wrapped in an Arc
    pub fn shared() -> SharedProgressReporter {
        Arc::new(Self)
    }
}
