use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Where the media element should read audio from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// Bytes from the blob store
    Local { id: String, data: Bytes },
    /// Streamed from the episode's remote URL
    Remote { url: String },
}

impl MediaSource {
    pub fn is_local(&self) -> bool {
        matches!(self, MediaSource::Local { .. })
    }
}

/// What asked for playback to start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayTrigger {
    /// Started by the controller itself, subject to autoplay policy
    Programmatic,
    /// Started by an explicit user action
    UserGesture,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("playback was blocked by the autoplay policy")]
    AutoplayBlocked,

    #[error("no source loaded")]
    NoSource,

    #[error("failed to decode audio: {0}")]
    Decode(String),
}

/// The audio output the playback controller drives
#[async_trait]
pub trait MediaElement: Send {
    /// Replace the source, rewinding to the start and pausing
    fn load(&mut self, source: MediaSource);

    /// Start or resume playback
    async fn play(&mut self, trigger: PlayTrigger) -> Result<(), MediaError>;

    fn pause(&mut self);

    fn is_paused(&self) -> bool;

    /// Position in seconds
    fn current_time(&self) -> f64;

    fn set_current_time(&mut self, seconds: f64);

    /// Length in seconds, `None` until the media metadata is known
    fn duration(&self) -> Option<f64>;

    fn playback_rate(&self) -> f64;

    fn set_playback_rate(&mut self, rate: f64);

    fn volume(&self) -> f64;

    fn set_volume(&mut self, volume: f64);
}

/// Whether programmatic playback starts are allowed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoplayPolicy {
    #[default]
    Allow,
    /// Only user gestures may start playback
    Block,
}

/// Media element without audio output.
///
/// Tracks the same state a real element would and enforces an autoplay
/// policy, which makes the controller usable from a terminal and in tests.
#[derive(Debug, Clone)]
pub struct HeadlessMedia {
    source: Option<MediaSource>,
    paused: bool,
    current_time: f64,
    duration: Option<f64>,
    playback_rate: f64,
    volume: f64,
    policy: AutoplayPolicy,
}

impl Default for HeadlessMedia {
    fn default() -> Self {
        Self {
            source: None,
            paused: true,
            current_time: 0.0,
            duration: None,
            playback_rate: 1.0,
            volume: 1.0,
            policy: AutoplayPolicy::Allow,
        }
    }
}

impl HeadlessMedia {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: AutoplayPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn source(&self) -> Option<&MediaSource> {
        self.source.as_ref()
    }

    /// Simulate the media metadata becoming available
    pub fn set_duration(&mut self, duration: Option<f64>) {
        self.duration = duration;
    }
}

#[async_trait]
impl MediaElement for HeadlessMedia {
    fn load(&mut self, source: MediaSource) {
        self.source = Some(source);
        self.paused = true;
        self.current_time = 0.0;
        self.duration = None;
    }

    async fn play(&mut self, trigger: PlayTrigger) -> Result<(), MediaError> {
        match &self.source {
            None => return Err(MediaError::NoSource),
            Some(MediaSource::Local { id, data }) if data.is_empty() => {
                return Err(MediaError::Decode(format!("stored audio for '{id}' is empty")));
            }
            Some(_) => {}
        }
        if trigger == PlayTrigger::Programmatic && self.policy == AutoplayPolicy::Block {
            return Err(MediaError::AutoplayBlocked);
        }
        self.paused = false;
        Ok(())
    }

    fn pause(&mut self) {
        self.paused = true;
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn current_time(&self) -> f64 {
        self.current_time
    }

    fn set_current_time(&mut self, seconds: f64) {
        self.current_time = seconds;
    }

    fn duration(&self) -> Option<f64> {
        self.duration
    }

    fn playback_rate(&self) -> f64 {
        self.playback_rate
    }

    fn set_playback_rate(&mut self, rate: f64) {
        self.playback_rate = rate;
    }

    fn volume(&self) -> f64 {
        self.volume
    }

    fn set_volume(&mut self, volume: f64) {
        self.volume = volume;
    }
}
