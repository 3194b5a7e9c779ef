use tokio::sync::mpsc;

use super::AnimationState;
use crate::error::FetchError;

/// Receiver of overlay notifications.
///
/// Callbacks run synchronously on the context driving the overlay and must
/// not block.
pub trait AnimationDelegate: Send {
    /// The public animation state changed.
    fn did_change_state(&mut self, previous: AnimationState, current: AnimationState);

    /// The current frame index changed, by a timer tick or a direct move.
    fn did_animate_frame(&mut self, frame_index: usize);

    /// A frame fetch failed. Called once per network fetch, however many
    /// requests shared it. Fetching of other frames continues.
    fn did_have_error(&mut self, error: &FetchError) {
        let _ = error;
    }
}

/// A delegate notification as a value.
#[derive(Debug, Clone, PartialEq)]
pub enum OverlayEvent {
    StateChanged {
        previous: AnimationState,
        current: AnimationState,
    },
    FrameAnimated(usize),
    FetchFailed(FetchError),
}

/// Forwards notifications into a channel. Sends to a closed channel are dropped.
impl AnimationDelegate for mpsc::UnboundedSender<OverlayEvent> {
    fn did_change_state(&mut self, previous: AnimationState, current: AnimationState) {
        let _ = self.send(OverlayEvent::StateChanged { previous, current });
    }

    fn did_animate_frame(&mut self, frame_index: usize) {
        let _ = self.send(OverlayEvent::FrameAnimated(frame_index));
    }

    fn did_have_error(&mut self, error: &FetchError) {
        let _ = self.send(OverlayEvent::FetchFailed(error.clone()));
    }
}
