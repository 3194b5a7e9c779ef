//! Animation controller.
//!
//! [`AnimationOverlay`] ties the tile cache and the fetch pipeline to the
//! playback state machine. It decides which cached frame is current and
//! whether a renderer should serve tiles from the cache or load them live.
//!
//! - [`AnimationState`]: Stopped, Loading, Animating or Scrubbing
//! - [`TileServingMode`]: cached synchronous lookups vs. live loads
//! - [`AnimationDelegate`]: state, frame and error notifications

mod delegate;
mod overlay;
mod state;

pub use delegate::{AnimationDelegate, OverlayEvent};
pub use overlay::{
    AnimationOverlay, CompletionHandler, FrameFailure, LoadOutcome, ProgressHandler,
};
pub use state::{AnimationState, TileServingMode};
