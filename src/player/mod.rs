mod controller;
mod media;

pub use controller::{
    MAX_PLAYBACK_RATE, MIN_PLAYBACK_RATE, PlaybackController, PlaybackCursor, PlaybackState,
};
pub use media::{AutoplayPolicy, HeadlessMedia, MediaElement, MediaError, MediaSource, PlayTrigger};
