use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single attempt against one endpoint
#[derive(Error, Debug)]
pub enum AttemptError {
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error {status} from {endpoint}")]
    Status { endpoint: String, status: u16 },

    #[error("stream error while reading {endpoint}: {source}")]
    Stream {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Errors returned by the resilient fetcher
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("all {attempts} attempts to fetch {url} failed, last error: {last}")]
    AllAttemptsFailed {
        url: String,
        attempts: usize,
        #[source]
        last: Box<AttemptError>,
    },
}

/// Errors that can occur when fetching or parsing RSS feeds
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Failed to fetch feed: {0}")]
    FetchFailed(#[from] FetchError),

    #[error("Failed to parse RSS feed: {0}")]
    ParseFailed(#[from] rss::Error),
}

/// Errors raised by the blob store
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to open blob store at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read blob {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write blob {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete blob {path}: {source}")]
    DeleteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt blob record {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

/// Errors raised by the settings store
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write settings file {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings JSON in {path}: {source}")]
    JsonParseFailed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize setting: {0}")]
    JsonSerializeFailed(#[from] serde_json::Error),
}

/// Errors reported by the playback controller
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("No audio available for '{title}'")]
    NoAudio { title: String },

    #[error("Episode index {index} out of range (have {len} episodes)")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Errors that abort a download operation
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),
}

/// Errors while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid {what} URL '{value}': {source}")]
    InvalidUrl {
        what: &'static str,
        value: String,
        #[source]
        source: url::ParseError,
    },
}
