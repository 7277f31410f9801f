// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::DownloadError;
use crate::feed::Episode;
use crate::fetch::{ResilientFetcher, ResponseKind};
use crate::http::HttpClient;
use crate::progress::{ProgressEvent, SharedProgressReporter};
use crate::store::{SettingsStore, SharedBlobStore};

use super::metadata::{DownloadRecord, read_download_index, write_download_index};

/// Result of a download or removal request
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadOutcome {
    /// The audio is now stored locally
    Downloaded(DownloadRecord),
    /// The local copy was deleted
    Removed,
    /// Nothing changed; `reason` is meant for the user
    Failed { reason: String },
}

/// Counts of entries dropped by [`DownloadManager::reconcile`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileReport {
    /// Metadata entries whose blob was missing
    pub orphaned_metadata: usize,
    /// Blobs without a metadata entry
    pub orphaned_blobs: usize,
}

/// Materializes episodes into the blob store and keeps the download index.
///
/// Blob and index updates are two separate writes; a crash between them
/// leaves a divergence that [`reconcile`](Self::reconcile) repairs.
pub struct DownloadManager<C> {
    fetcher: Arc<ResilientFetcher<C>>,
    blobs: SharedBlobStore,
    settings: Arc<SettingsStore>,
    reporter: SharedProgressReporter,
}

impl<C: HttpClient> DownloadManager<C> {
    pub fn new(
        fetcher: Arc<ResilientFetcher<C>>,
        blobs: SharedBlobStore,
        settings: Arc<SettingsStore>,
        reporter: SharedProgressReporter,
    ) -> Self {
        Self {
            fetcher,
            blobs,
            settings,
            reporter,
        }
    }

    pub fn is_downloaded(&self, id: &str) -> bool {
        read_download_index(&self.settings).contains_key(id)
    }

    /// Downloaded episodes, most recent download first
    pub fn downloads(&self) -> Vec<(String, DownloadRecord)> {
        let mut downloads: Vec<_> = read_download_index(&self.settings).into_iter().collect();
        downloads.sort_by(|a, b| b.1.downloaded_at.cmp(&a.1.downloaded_at));
        downloads
    }

    /// Remove the episode if it is downloaded, download it otherwise
    pub async fn toggle_download(&self, episode: &Episode) -> Result<DownloadOutcome, DownloadError> {
        if self.is_downloaded(&episode.id) {
            self.remove(&episode.id).await
        } else {
            self.download(episode).await
        }
    }

    /// Fetch the episode audio and store it with fresh metadata.
    ///
    /// Fetch failures are reported as [`DownloadOutcome::Failed`] and
    /// leave storage untouched; storage failures are errors.
    pub async fn download(&self, episode: &Episode) -> Result<DownloadOutcome, DownloadError> {
        if !episode.has_audio() {
            return Ok(self.fail(episode, format!("No audio available for '{}'", episode.title)));
        }

        self.reporter.report(ProgressEvent::DownloadStarting {
            episode_id: episode.id.clone(),
            episode_title: episode.title.clone(),
        });

        let reporter = self.reporter.clone();
        let episode_id = episode.id.clone();
        let fetched = self
            .fetcher
            .fetch_with_progress(&episode.audio_url, ResponseKind::Binary, |received, total| {
                reporter.report(ProgressEvent::DownloadProgress {
                    episode_id: episode_id.clone(),
                    bytes_downloaded: received,
                    total_bytes: total,
                });
            })
            .await;

        let data = match fetched {
            Ok(fetched) => fetched.into_bytes(),
            Err(e) => {
                return Ok(self.fail(
                    episode,
                    format!("Download failed, this may be due to cross-origin restrictions: {e}"),
                ));
            }
        };

        let record = DownloadRecord::new(&episode.title, &data);
        let bytes_downloaded = data.len() as u64;

        self.blobs.put(&episode.id, data).await?;

        let mut index = read_download_index(&self.settings);
        index.insert(episode.id.clone(), record.clone());
        write_download_index(&self.settings, &index)?;

        info!(id = %episode.id, size_mb = record.size_mb, "episode downloaded");
        self.reporter.report(ProgressEvent::DownloadCompleted {
            episode_id: episode.id.clone(),
            episode_title: episode.title.clone(),
            bytes_downloaded,
        });

        Ok(DownloadOutcome::Downloaded(record))
    }

    /// Delete the local copy: blob first, then the index entry
    pub async fn remove(&self, id: &str) -> Result<DownloadOutcome, DownloadError> {
        self.blobs.delete(id).await?;

        let mut index = read_download_index(&self.settings);
        let removed = index.remove(id);
        write_download_index(&self.settings, &index)?;

        debug!(id, "download removed");
        self.reporter.report(ProgressEvent::DownloadRemoved {
            episode_id: id.to_string(),
            episode_title: removed.map(|r| r.title).unwrap_or_else(|| id.to_string()),
        });

        Ok(DownloadOutcome::Removed)
    }

    /// Bring the download index and the blob store back in agreement by
    /// dropping entries present on only one side
    pub async fn reconcile(&self) -> Result<ReconcileReport, DownloadError> {
        let keys = self.blobs.list_keys().await?;
        let mut index = read_download_index(&self.settings);
        let mut report = ReconcileReport::default();

        let before = index.len();
        index.retain(|id, _| keys.contains(id));
        report.orphaned_metadata = before - index.len();
        if report.orphaned_metadata > 0 {
            write_download_index(&self.settings, &index)?;
        }

        for id in keys.iter().filter(|id| !index.contains_key(*id)) {
            self.blobs.delete(id).await?;
            report.orphaned_blobs += 1;
        }

        if report != ReconcileReport::default() {
            warn!(
                orphaned_metadata = report.orphaned_metadata,
                orphaned_blobs = report.orphaned_blobs,
                "download index and blob store had diverged"
            );
        }
        self.reporter.report(ProgressEvent::Reconciled {
            orphaned_metadata: report.orphaned_metadata,
            orphaned_blobs: report.orphaned_blobs,
        });

        Ok(report)
    }

    fn fail(&self, episode: &Episode, reason: String) -> DownloadOutcome {
        warn!(id = %episode.id, %reason, "download failed");
        self.reporter.report(ProgressEvent::DownloadFailed {
            episode_id: episode.id.clone(),
            episode_title: episode.title.clone(),
            error: reason.clone(),
        });
        DownloadOutcome::Failed { reason }
    }
}
