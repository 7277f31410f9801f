pub mod config;
pub mod download;
pub mod error;
pub mod feed;
pub mod fetch;
pub mod http;
pub mod library;
pub mod player;
pub mod progress;
pub mod store;

#[cfg(test)]
mod test_support;

// Re-export main types for convenience
pub use config::Config;
pub use download::{DownloadManager, DownloadOutcome, DownloadRecord, ReconcileReport};
pub use error::{
    AttemptError, ConfigError, DownloadError, FeedError, FetchError, PlaybackError, SettingsError,
    StorageError,
};
pub use feed::{Episode, FeedOrigin, LoadedFeed, load_episodes, parse_feed, search};
pub use fetch::{FetchStrategy, Fetched, ResilientFetcher, ResponseKind};
pub use http::{HttpClient, HttpResponse, ReqwestClient};
pub use library::{HistoryEntry, Library, Preferences};
pub use player::{
    AutoplayPolicy, HeadlessMedia, MediaElement, MediaSource, PlaybackController, PlaybackCursor,
    PlaybackState,
};
pub use progress::{NoopReporter, ProgressEvent, ProgressReporter, SharedProgressReporter};
pub use store::{BlobStore, FsBlobStore, MemoryBlobStore, SettingsStore, SharedBlobStore};
