use std::fmt;

use tokio::time::Interval;

/// Public playback state of an overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnimationState {
    /// Not animating and nothing loading
    Stopped,
    /// A tile load is outstanding
    Loading,
    /// The frame timer is running
    Animating,
    /// The caller is moving through frames directly
    Scrubbing,
}

impl AnimationState {
    /// How tiles should be served to a renderer in this state.
    pub fn serving_mode(&self) -> TileServingMode {
        match self {
            AnimationState::Animating | AnimationState::Scrubbing => TileServingMode::Cached,
            AnimationState::Stopped | AnimationState::Loading => TileServingMode::Live,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnimationState::Stopped => "stopped",
            AnimationState::Loading => "loading",
            AnimationState::Animating => "animating",
            AnimationState::Scrubbing => "scrubbing",
        }
    }
}

impl fmt::Display for AnimationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a renderer should get tile images from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileServingMode {
    /// Synchronous lookups of already-cached frames; never fetches
    Cached,
    /// Asynchronous per-tile loads through the fetch pipeline
    Live,
}

/// Mode to return to when scrubbing ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResumeMode {
    Stopped,
    Animating,
}

/// Internal playback state. Each variant carries only the data valid for it.
#[derive(Debug)]
pub(crate) enum Playback {
    Stopped,
    Loading,
    Animating { ticker: Interval },
    Scrubbing { resume: ResumeMode },
}

impl Playback {
    pub(crate) fn state(&self) -> AnimationState {
        match self {
            Playback::Stopped => AnimationState::Stopped,
            Playback::Loading => AnimationState::Loading,
            Playback::Animating { .. } => AnimationState::Animating,
            Playback::Scrubbing { .. } => AnimationState::Scrubbing,
        }
    }
}
