// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use tracing::{debug, warn};

use crate::error::PlaybackError;
use crate::feed::Episode;
use crate::library::Library;
use crate::store::SharedBlobStore;

use super::media::{MediaElement, MediaError, MediaSource, PlayTrigger};

pub const MIN_PLAYBACK_RATE: f64 = 0.5;
pub const MAX_PLAYBACK_RATE: f64 = 2.0;

/// Playback lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Nothing selected, or the last episode just ended
    Idle,
    /// A source is being assigned
    Loading,
    Playing,
    Paused,
}

/// Snapshot of which episode is current and whether it is playing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackCursor {
    pub current_index: Option<usize>,
    pub is_playing: bool,
}

/// Drives a [`MediaElement`] over an ordered, circular episode list.
///
/// Audio comes from the blob store when a local copy exists and is
/// streamed from the episode URL otherwise.
pub struct PlaybackController<M> {
    episodes: Vec<Episode>,
    current_index: Option<usize>,
    state: PlaybackState,
    media: M,
    blobs: SharedBlobStore,
    library: Library,
}

impl<M: MediaElement> PlaybackController<M> {
    pub fn new(media: M, blobs: SharedBlobStore, library: Library) -> Self {
        Self {
            episodes: Vec::new(),
            current_index: None,
            state: PlaybackState::Idle,
            media,
            blobs,
            library,
        }
    }

    /// Replace the episode sequence wholesale.
    ///
    /// The cursor follows the current episode by id; if it is gone the
    /// controller stops and returns to idle.
    pub fn replace_episodes(&mut self, episodes: Vec<Episode>) {
        let current_id = self.current_episode().map(|ep| ep.id.clone());
        self.episodes = episodes;
        self.current_index =
            current_id.and_then(|id| self.episodes.iter().position(|ep| ep.id == id));

        if self.current_index.is_none() && self.state != PlaybackState::Idle {
            self.media.pause();
            self.state = PlaybackState::Idle;
        }
    }

    pub fn episodes(&self) -> &[Episode] {
        &self.episodes
    }

    pub fn current_episode(&self) -> Option<&Episode> {
        self.current_index.and_then(|i| self.episodes.get(i))
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn cursor(&self) -> PlaybackCursor {
        PlaybackCursor {
            current_index: self.current_index,
            is_playing: self.state == PlaybackState::Playing,
        }
    }

    pub fn media(&self) -> &M {
        &self.media
    }

    pub fn media_mut(&mut self) -> &mut M {
        &mut self.media
    }

    /// Make episode `index` current and start playing it.
    ///
    /// Fails without touching the cursor when the episode has neither a
    /// local copy nor a remote URL. A blocked or failed start leaves the
    /// controller paused rather than returning an error.
    pub async fn select_episode(&mut self, index: usize) -> Result<(), PlaybackError> {
        let episode = self
            .episodes
            .get(index)
            .cloned()
            .ok_or(PlaybackError::IndexOutOfRange {
                index,
                len: self.episodes.len(),
            })?;

        let source = self
            .resolve_source(&episode)
            .await
            .ok_or_else(|| PlaybackError::NoAudio {
                title: episode.title.clone(),
            })?;

        debug!(
            index,
            id = %episode.id,
            local = source.is_local(),
            "selecting episode"
        );

        self.current_index = Some(index);
        self.state = PlaybackState::Loading;
        self.media.load(source);

        if let Err(e) = self.library.record_play(&episode.id) {
            warn!(id = %episode.id, error = %e, "failed to record listening history");
        }

        self.start(PlayTrigger::Programmatic).await;
        Ok(())
    }

    async fn resolve_source(&self, episode: &Episode) -> Option<MediaSource> {
        match self.blobs.get(&episode.id).await {
            Ok(Some(data)) => {
                return Some(MediaSource::Local {
                    id: episode.id.clone(),
                    data,
                });
            }
            Ok(None) => {}
            Err(e) => warn!(id = %episode.id, error = %e, "blob lookup failed, streaming instead"),
        }

        episode.has_audio().then(|| MediaSource::Remote {
            url: episode.audio_url.clone(),
        })
    }

    async fn start(&mut self, trigger: PlayTrigger) {
        self.state = match self.media.play(trigger).await {
            Ok(()) => PlaybackState::Playing,
            Err(MediaError::AutoplayBlocked) => {
                debug!("autoplay prevented, waiting for user interaction");
                PlaybackState::Paused
            }
            Err(e) => {
                warn!(error = %e, "playback failed to start");
                self.media.pause();
                PlaybackState::Paused
            }
        };
    }

    /// Advance circularly; a no-op for an empty list
    pub async fn play_next(&mut self) -> Result<(), PlaybackError> {
        let len = self.episodes.len();
        if len == 0 {
            return Ok(());
        }
        let next = match self.current_index {
            Some(i) => (i + 1) % len,
            None => 0,
        };
        self.select_episode(next).await
    }

    /// Step back circularly; a no-op for an empty list
    pub async fn play_previous(&mut self) -> Result<(), PlaybackError> {
        let len = self.episodes.len();
        if len == 0 {
            return Ok(());
        }
        let previous = match self.current_index {
            Some(i) => (i + len - 1) % len,
            None => len - 1,
        };
        self.select_episode(previous).await
    }

    /// Resume the current episode on behalf of the user
    pub async fn play(&mut self) {
        if self.current_index.is_none() || self.state == PlaybackState::Playing {
            return;
        }
        self.start(PlayTrigger::UserGesture).await;
    }

    pub fn pause(&mut self) {
        if self.state == PlaybackState::Playing {
            self.media.pause();
            self.state = PlaybackState::Paused;
        }
    }

    pub async fn toggle_play_pause(&mut self) {
        if self.state == PlaybackState::Playing {
            self.pause();
        } else {
            self.play().await;
        }
    }

    fn known_duration(&self) -> Option<f64> {
        self.media
            .duration()
            .filter(|d| d.is_finite() && *d > 0.0)
    }

    /// Jump to `fraction` (0..=1) of the duration; ignored while it is unknown
    pub fn seek(&mut self, fraction: f64) {
        let Some(duration) = self.known_duration() else {
            return;
        };
        if fraction.is_nan() {
            return;
        }
        self.media
            .set_current_time(fraction.clamp(0.0, 1.0) * duration);
    }

    /// Move by `seconds` (negative rewinds), staying within the track
    pub fn skip(&mut self, seconds: f64) {
        let Some(duration) = self.known_duration() else {
            return;
        };
        if !seconds.is_finite() {
            return;
        }
        let target = (self.media.current_time() + seconds).clamp(0.0, duration);
        self.media.set_current_time(target);
    }

    pub fn set_playback_rate(&mut self, rate: f64) {
        if rate.is_finite() {
            self.media
                .set_playback_rate(rate.clamp(MIN_PLAYBACK_RATE, MAX_PLAYBACK_RATE));
        }
    }

    pub fn set_volume(&mut self, volume: f64) {
        if volume.is_finite() {
            self.media.set_volume(volume.clamp(0.0, 1.0));
        }
    }

    /// The current episode finished: go idle, then continue with the next one
    pub async fn handle_ended(&mut self) -> Result<(), PlaybackError> {
        self.media.pause();
        self.state = PlaybackState::Idle;
        self.play_next().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use bytes::Bytes;

    use crate::player::media::{AutoplayPolicy, HeadlessMedia};
    use crate::store::{BlobStore, MemoryBlobStore, SettingsStore};
    use crate::test_support::{BrokenBlobStore, make_episode, make_episodes};

    fn controller_with(
        media: HeadlessMedia,
        blobs: SharedBlobStore,
        episodes: Vec<Episode>,
    ) -> (PlaybackController<HeadlessMedia>, Library) {
        let library = Library::new(Arc::new(SettingsStore::in_memory()));
        let mut controller = PlaybackController::new(media, blobs, library.clone());
        controller.replace_episodes(episodes);
        (controller, library)
    }

    fn setup(count: usize) -> (PlaybackController<HeadlessMedia>, Library) {
        controller_with(
            HeadlessMedia::new(),
            MemoryBlobStore::shared(),
            make_episodes(count),
        )
    }

    #[tokio::test]
    async fn select_streams_remote_when_not_downloaded() {
        let (mut controller, library) = setup(3);

        controller.select_episode(1).await.unwrap();

        assert_eq!(
            controller.media().source(),
            Some(&MediaSource::Remote {
                url: "https://example.com/ep1.mp3".to_string()
            })
        );
        assert_eq!(controller.state(), PlaybackState::Playing);
        assert_eq!(
            controller.cursor(),
            PlaybackCursor {
                current_index: Some(1),
                is_playing: true
            }
        );
        assert_eq!(library.history()[0].id, "ep-1");
    }

    #[tokio::test]
    async fn select_prefers_local_blob() {
        let blobs = MemoryBlobStore::shared();
        blobs
            .put("ep-0", Bytes::from_static(b"offline audio"))
            .await
            .unwrap();
        let (mut controller, _) = controller_with(HeadlessMedia::new(), blobs, make_episodes(2));

        controller.select_episode(0).await.unwrap();

        assert_eq!(
            controller.media().source(),
            Some(&MediaSource::Local {
                id: "ep-0".to_string(),
                data: Bytes::from_static(b"offline audio")
            })
        );
    }

    #[tokio::test]
    async fn undecodable_audio_leaves_player_paused() {
        let blobs = MemoryBlobStore::shared();
        blobs.put("ep-0", Bytes::new()).await.unwrap();
        let (mut controller, library) =
            controller_with(HeadlessMedia::new(), blobs, make_episodes(2));

        controller.select_episode(0).await.unwrap();

        assert_eq!(controller.state(), PlaybackState::Paused);
        assert!(controller.media().is_paused());
        assert_eq!(controller.cursor().current_index, Some(0));
        assert_eq!(library.history()[0].id, "ep-0");
    }

    #[tokio::test]
    async fn broken_blob_store_falls_back_to_stream() {
        let (mut controller, _) =
            controller_with(HeadlessMedia::new(), Arc::new(BrokenBlobStore), make_episodes(1));

        controller.select_episode(0).await.unwrap();

        assert!(!controller.media().source().unwrap().is_local());
        assert_eq!(controller.state(), PlaybackState::Playing);
    }

    #[tokio::test]
    async fn episode_without_audio_is_rejected_and_cursor_kept() {
        let mut episodes = make_episodes(2);
        episodes.push(make_episode("silent", "Silent Story", ""));
        let (mut controller, library) =
            controller_with(HeadlessMedia::new(), MemoryBlobStore::shared(), episodes);
        controller.select_episode(0).await.unwrap();

        let err = controller.select_episode(2).await.unwrap_err();

        assert_eq!(
            err,
            PlaybackError::NoAudio {
                title: "Silent Story".to_string()
            }
        );
        assert_eq!(controller.cursor().current_index, Some(0));
        assert_eq!(library.history().len(), 1);
    }

    #[tokio::test]
    async fn out_of_range_index_is_rejected() {
        let (mut controller, _) = setup(2);

        assert_eq!(
            controller.select_episode(5).await.unwrap_err(),
            PlaybackError::IndexOutOfRange { index: 5, len: 2 }
        );
        assert_eq!(controller.state(), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn blocked_autoplay_stays_paused_until_gesture() {
        let (mut controller, _) = controller_with(
            HeadlessMedia::with_policy(AutoplayPolicy::Block),
            MemoryBlobStore::shared(),
            make_episodes(2),
        );

        controller.select_episode(0).await.unwrap();
        assert_eq!(controller.state(), PlaybackState::Paused);
        assert_eq!(controller.cursor().current_index, Some(0));

        controller.toggle_play_pause().await;
        assert_eq!(controller.state(), PlaybackState::Playing);

        controller.toggle_play_pause().await;
        assert_eq!(controller.state(), PlaybackState::Paused);
        assert!(controller.media().is_paused());
    }

    #[tokio::test]
    async fn play_next_wraps_around_the_list() {
        let (mut controller, _) = setup(5);
        controller.select_episode(3).await.unwrap();

        for _ in 0..5 {
            controller.play_next().await.unwrap();
        }

        assert_eq!(controller.cursor().current_index, Some(3));
    }

    #[tokio::test]
    async fn play_previous_wraps_to_last() {
        let (mut controller, _) = setup(4);
        controller.select_episode(0).await.unwrap();

        controller.play_previous().await.unwrap();
        assert_eq!(controller.cursor().current_index, Some(3));
    }

    #[tokio::test]
    async fn next_and_previous_without_selection() {
        let (mut controller, _) = setup(4);
        controller.play_next().await.unwrap();
        assert_eq!(controller.cursor().current_index, Some(0));

        let (mut controller, _) = setup(4);
        controller.play_previous().await.unwrap();
        assert_eq!(controller.cursor().current_index, Some(3));
    }

    #[tokio::test]
    async fn navigation_on_empty_list_is_noop() {
        let (mut controller, _) = setup(0);

        controller.play_next().await.unwrap();
        controller.play_previous().await.unwrap();

        assert_eq!(controller.cursor().current_index, None);
        assert_eq!(controller.state(), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn seek_needs_known_duration() {
        let (mut controller, _) = setup(1);
        controller.select_episode(0).await.unwrap();

        controller.seek(0.5);
        assert_eq!(controller.media().current_time(), 0.0);

        controller.media_mut().set_duration(Some(200.0));
        controller.seek(0.25);
        assert_eq!(controller.media().current_time(), 50.0);

        controller.seek(3.0);
        assert_eq!(controller.media().current_time(), 200.0);
    }

    #[tokio::test]
    async fn skip_clamps_to_track_bounds() {
        let (mut controller, _) = setup(1);
        controller.select_episode(0).await.unwrap();
        controller.media_mut().set_duration(Some(60.0));

        controller.skip(15.0);
        assert_eq!(controller.media().current_time(), 15.0);

        controller.skip(-30.0);
        assert_eq!(controller.media().current_time(), 0.0);

        controller.skip(120.0);
        assert_eq!(controller.media().current_time(), 60.0);
    }

    #[tokio::test]
    async fn rate_and_volume_are_clamped() {
        let (mut controller, _) = setup(1);

        controller.set_playback_rate(4.0);
        assert_eq!(controller.media().playback_rate(), MAX_PLAYBACK_RATE);
        controller.set_playback_rate(f64::NAN);
        assert_eq!(controller.media().playback_rate(), MAX_PLAYBACK_RATE);

        controller.set_volume(-1.0);
        assert_eq!(controller.media().volume(), 0.0);
        controller.set_volume(0.4);
        assert_eq!(controller.media().volume(), 0.4);
    }

    #[tokio::test]
    async fn ended_auto_advances_and_wraps() {
        let (mut controller, _) = setup(3);
        controller.select_episode(2).await.unwrap();

        controller.handle_ended().await.unwrap();

        assert_eq!(controller.cursor().current_index, Some(0));
        assert_eq!(controller.state(), PlaybackState::Playing);
    }

    #[tokio::test]
    async fn sixty_selections_keep_fifty_newest() {
        let (mut controller, library) = setup(60);

        for i in 0..60 {
            controller.select_episode(i).await.unwrap();
        }

        let history = library.history();
        assert_eq!(history.len(), 50);
        assert_eq!(history[0].id, "ep-59");
        assert_eq!(history[49].id, "ep-10");
    }

    #[tokio::test]
    async fn replacing_episodes_follows_current_id() {
        let (mut controller, _) = setup(3);
        controller.select_episode(1).await.unwrap();

        let mut reordered = make_episodes(3);
        reordered.reverse();
        controller.replace_episodes(reordered);
        assert_eq!(controller.cursor().current_index, Some(1));
        assert_eq!(controller.current_episode().unwrap().id, "ep-1");

        controller.replace_episodes(make_episodes(1));
        assert_eq!(controller.cursor().current_index, None);
        assert_eq!(controller.state(), PlaybackState::Idle);
    }
}
