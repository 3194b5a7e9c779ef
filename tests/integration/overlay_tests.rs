//! Animation overlay tests: loading, playback timing and scrubbing.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use tile_animator::coord::{map_rect, zoom_scale};
use tile_animator::{
    AnimationOverlay, AnimationState, FetchError, LoadOutcome, MapRect, OverlayError, SlotState,
    TileCoordinate,
};

use super::test_utils::{overlay_with, MockTileSource, Recorded, RecordingDelegate};

use AnimationState::{Animating, Loading, Scrubbing, Stopped};

/// A single tile at zoom 2.
const TILE: TileCoordinate = TileCoordinate { x: 1, y: 2, z: 2 };

fn one_tile() -> MapRect {
    map_rect(TILE)
}

/// Two horizontally adjacent tiles at zoom 2.
fn two_tiles() -> MapRect {
    let left = map_rect(TILE);
    MapRect::new(
        left.origin.x,
        left.origin.y,
        left.size.width * 2.0,
        left.size.height,
    )
}

/// Progress and completion handlers that record into shared vectors.
#[derive(Clone, Default)]
struct LoadLog {
    progress: Arc<Mutex<Vec<usize>>>,
    outcomes: Arc<Mutex<Vec<LoadOutcome>>>,
}

impl LoadLog {
    fn fetch(&self, overlay: &mut AnimationOverlay, rect: MapRect, zoom: u32) {
        let progress = Arc::clone(&self.progress);
        let outcomes = Arc::clone(&self.outcomes);
        overlay
            .fetch_tiles_for_map_rect(
                rect,
                zoom,
                move |frame| progress.lock().unwrap().push(frame),
                move |outcome| outcomes.lock().unwrap().push(outcome),
            )
            .unwrap();
    }

    fn progress(&self) -> Vec<usize> {
        self.progress.lock().unwrap().clone()
    }

    fn outcomes(&self) -> Vec<LoadOutcome> {
        self.outcomes.lock().unwrap().clone()
    }
}

async fn loaded_overlay(
    source: &MockTileSource,
    frames: &[&str],
) -> (AnimationOverlay, RecordingDelegate) {
    let delegate = RecordingDelegate::new();
    let mut overlay = overlay_with(source, frames).with_delegate(delegate.clone());
    LoadLog::default().fetch(&mut overlay, one_tile(), TILE.z);
    overlay.wait_for_load().await;
    delegate.clear();
    (overlay, delegate)
}

// =============================================================================
// Loading
// =============================================================================

#[tokio::test]
async fn test_load_reports_every_frame_then_completes() {
    let source = MockTileSource::new();
    let delegate = RecordingDelegate::new();
    let mut overlay = overlay_with(&source, &["a", "b", "c"]).with_delegate(delegate.clone());
    let log = LoadLog::default();

    log.fetch(&mut overlay, two_tiles(), TILE.z);
    assert_eq!(overlay.state(), Loading);
    assert_eq!(overlay.visible_tiles().len(), 2);

    overlay.wait_for_load().await;

    let mut progress = log.progress();
    progress.sort();
    assert_eq!(progress, vec![0, 1, 2]);

    let outcomes = log.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].success);
    assert_eq!(outcomes[0].loaded_frames, 3);
    assert!(outcomes[0].failures.is_empty());

    assert_eq!(overlay.state(), Stopped);
    assert_eq!(delegate.states(), vec![(Stopped, Loading), (Loading, Stopped)]);
    assert_eq!(source.call_count(), 6);
    assert!(overlay.can_animate_for_map_rect(&two_tiles(), TILE.z));
}

#[tokio::test]
async fn test_failed_frame_is_reported_and_load_still_completes() {
    let source = MockTileSource::new();
    let delegate = RecordingDelegate::new();
    let mut overlay =
        overlay_with(&source, &["a", "fail", "c"]).with_delegate(delegate.clone());
    let log = LoadLog::default();

    log.fetch(&mut overlay, one_tile(), TILE.z);
    overlay.wait_for_load().await;

    // The failed frame still counts as finished
    let mut progress = log.progress();
    progress.sort();
    assert_eq!(progress, vec![0, 1, 2]);

    let outcome = &log.outcomes()[0];
    assert!(outcome.success, "current frame 0 loaded");
    assert_eq!(outcome.loaded_frames, 2);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].frame_index, 1);
    assert_eq!(outcome.failures[0].coordinate, TILE);

    let errors = delegate.errors();
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        &errors[0],
        FetchError::BadUrlResponse { status: 404, url } if url.contains("/fail/")
    ));

    let tile = overlay.cache().get(&TILE).unwrap();
    assert!(tile.failed_to_fetch());
    assert_eq!(tile.slot_state(1), Some(SlotState::Failed));
}

#[tokio::test]
async fn test_load_fails_when_current_frame_is_missing() {
    let source = MockTileSource::new();
    let mut overlay = overlay_with(&source, &["fail", "b"]);
    let log = LoadLog::default();

    log.fetch(&mut overlay, one_tile(), TILE.z);
    overlay.wait_for_load().await;

    let outcome = &log.outcomes()[0];
    assert!(!outcome.success);
    assert_eq!(outcome.loaded_frames, 1);

    // A later frame is still animatable
    assert!(overlay.start_animating().is_ok());
    assert_eq!(overlay.state(), Animating);
}

#[tokio::test]
async fn test_cancel_loading_leaves_nothing_in_flight() {
    let source = MockTileSource::new();
    let delegate = RecordingDelegate::new();
    let mut overlay = overlay_with(&source, &["a", "hang"]).with_delegate(delegate.clone());
    let log = LoadLog::default();

    log.fetch(&mut overlay, one_tile(), TILE.z);
    // Frame 0 lands, frame 1 hangs
    while overlay.cache().get(&TILE).unwrap().slot_state(0) != Some(SlotState::Loaded) {
        assert!(overlay.process_next().await);
    }

    overlay.cancel_loading();

    assert_eq!(overlay.state(), Stopped);
    assert!(!overlay.is_loading());
    let tile = overlay.cache().get(&TILE).unwrap();
    assert_eq!(tile.slot_state(0), Some(SlotState::Loaded));
    assert_eq!(tile.slot_state(1), Some(SlotState::Empty));
    assert!(tile.is_settled());

    // Nothing left to drive and the completion never fires
    assert!(!overlay.process_next().await);
    assert!(log.outcomes().is_empty());
    assert_eq!(log.progress(), vec![0]);
    assert_eq!(
        delegate.states(),
        vec![(Stopped, Loading), (Loading, Stopped)]
    );
}

#[tokio::test]
async fn test_new_fetch_supersedes_previous_load() {
    let source = MockTileSource::new();
    let mut overlay = overlay_with(&source, &["hang"]);
    let first = LoadLog::default();
    let second = LoadLog::default();

    first.fetch(&mut overlay, two_tiles(), TILE.z);
    assert_eq!(overlay.cache().len(), 2);

    // Zooming out replaces the visible set
    second.fetch(&mut overlay, MapRect::world(), 0);
    assert_eq!(overlay.visible_tiles(), &[TileCoordinate::new(0, 0, 0)]);
    assert_eq!(overlay.cache().len(), 1);
    assert_eq!(overlay.state(), Loading);

    overlay.cancel_loading();
    assert!(first.outcomes().is_empty());
    assert!(second.outcomes().is_empty());
}

#[tokio::test]
async fn test_widening_mid_load_reuses_outstanding_fetches() {
    let source = MockTileSource::with_delay(Duration::from_millis(50));
    let mut overlay = overlay_with(&source, &["a", "b"]);
    let first = LoadLog::default();
    let second = LoadLog::default();

    first.fetch(&mut overlay, one_tile(), TILE.z);
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Panning to cover a neighbour keeps the first tile's fetches running
    second.fetch(&mut overlay, two_tiles(), TILE.z);
    overlay.wait_for_load().await;

    // Two tiles times two frames, each fetched exactly once
    assert_eq!(source.call_count(), 4);
    assert_eq!(source.calls_for("https://tiles.test/a/2/1/2.png"), 1);
    assert_eq!(source.calls_for("https://tiles.test/b/2/1/2.png"), 1);

    assert!(first.outcomes().is_empty());
    let outcomes = second.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].success);
    assert_eq!(outcomes[0].loaded_frames, 2);

    let mut progress = second.progress();
    progress.sort();
    assert_eq!(progress, vec![0, 1]);
    assert!(overlay.can_animate_for_map_rect(&two_tiles(), TILE.z));
}

#[tokio::test]
async fn test_shared_failed_fetch_reports_error_once() {
    let source = MockTileSource::with_delay(Duration::from_millis(20));
    let delegate = RecordingDelegate::new();
    let mut overlay = overlay_with(&source, &["fail"]).with_delegate(delegate.clone());
    let log = LoadLog::default();

    log.fetch(&mut overlay, one_tile(), TILE.z);

    // The live request joins the load's fetch for the same frame
    let result = overlay.load_tile(TILE).await;
    assert!(matches!(
        result,
        Err(OverlayError::Fetch(FetchError::BadUrlResponse { status: 404, .. }))
    ));
    overlay.wait_for_load().await;

    assert_eq!(source.call_count(), 1);
    assert_eq!(delegate.errors().len(), 1);

    // The load still lists the failure against itself
    let outcomes = log.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].failures.len(), 1);
    assert!(!outcomes[0].success);
}

#[tokio::test]
async fn test_region_over_tile_limit_is_rejected() {
    let source = MockTileSource::new();
    let mut overlay = overlay_with(&source, &["a"]);

    // The whole world at zoom 8 is 65536 tiles
    let result = overlay.fetch_tiles_for_map_rect(MapRect::world(), 8, |_| {}, |_| {});
    assert!(matches!(
        result,
        Err(OverlayError::TooManyTiles {
            count: 65536,
            limit: 1024
        })
    ));
    assert_eq!(overlay.state(), Stopped);
    assert!(overlay.cache().is_empty());
    assert_eq!(source.call_count(), 0);
}

#[tokio::test]
async fn test_loaded_frames_are_not_fetched_again() {
    let source = MockTileSource::new();
    let mut overlay = overlay_with(&source, &["a", "b"]);

    LoadLog::default().fetch(&mut overlay, one_tile(), TILE.z);
    overlay.wait_for_load().await;
    assert_eq!(source.call_count(), 2);

    let log = LoadLog::default();
    log.fetch(&mut overlay, one_tile(), TILE.z);
    overlay.wait_for_load().await;

    assert_eq!(source.call_count(), 2);
    assert!(log.outcomes()[0].success);
}

#[tokio::test]
async fn test_empty_rect_completes_immediately() {
    let source = MockTileSource::new();
    let delegate = RecordingDelegate::new();
    let mut overlay = overlay_with(&source, &["a"]).with_delegate(delegate.clone());
    let log = LoadLog::default();

    log.fetch(&mut overlay, MapRect::new(10.0, 10.0, 0.0, 0.0), 3);

    assert_eq!(log.outcomes().len(), 1);
    assert!(log.outcomes()[0].success);
    assert_eq!(overlay.state(), Stopped);
    assert!(delegate.states().is_empty());
    assert_eq!(source.call_count(), 0);
}

#[tokio::test]
async fn test_zoom_outside_range_is_rejected() {
    let source = MockTileSource::new();
    let mut overlay = overlay_with(&source, &["a"]);

    let result = overlay.fetch_tiles_for_map_rect(one_tile(), 12, |_| {}, |_| {});
    assert!(matches!(
        result,
        Err(OverlayError::InvalidZoomLevel {
            zoom: 12,
            minimum: 0,
            maximum: 8
        })
    ));
    assert_eq!(overlay.state(), Stopped);
    assert!(overlay.cache().is_empty());
}

#[tokio::test]
async fn test_flush_during_load_delivers_to_recreated_tile() {
    let source = MockTileSource::with_delay(Duration::from_millis(20));
    let mut overlay = overlay_with(&source, &["a"]);

    LoadLog::default().fetch(&mut overlay, one_tile(), TILE.z);
    overlay.flush_tile_cache();
    assert!(overlay.cache().is_empty());

    // Requesting the tile again picks up the outstanding fetch
    let image = overlay.load_tile(TILE).await.unwrap();
    assert_eq!(image.width(), 4);
    assert_eq!(source.call_count(), 1);
}

// =============================================================================
// Live Tile Loading
// =============================================================================

#[tokio::test]
async fn test_load_tile_fetches_current_frame() {
    let source = MockTileSource::new();
    let mut overlay = overlay_with(&source, &["a", "b"]);

    let image = overlay.load_tile(TILE).await.unwrap();
    assert_eq!(image.height(), 4);
    assert_eq!(source.urls(), vec!["https://tiles.test/a/2/1/2.png".to_string()]);

    // Cached now
    let again = overlay.load_tile(TILE).await.unwrap();
    assert!(Arc::ptr_eq(&image, &again));
    assert_eq!(source.call_count(), 1);

    overlay.move_to_frame_index(1, false).unwrap();
    overlay.load_tile(TILE).await.unwrap();
    assert_eq!(source.calls_for("https://tiles.test/b/2/1/2.png"), 1);
}

#[tokio::test]
async fn test_load_tile_surfaces_fetch_errors() {
    let source = MockTileSource::new();
    let mut overlay = overlay_with(&source, &["garbage"]);

    let result = overlay.load_tile(TILE).await;
    assert!(matches!(
        result,
        Err(OverlayError::Fetch(FetchError::NoImageData { .. }))
    ));
}

#[tokio::test]
async fn test_tile_lookup_never_fetches() {
    let source = MockTileSource::new();
    let mut overlay = overlay_with(&source, &["a", "b"]);

    let tile = overlay.tile_for_map_rect(&one_tile(), zoom_scale(TILE.z));
    assert_eq!(tile.coordinate(), TILE);
    assert_eq!(tile.slot_state(0), Some(SlotState::Empty));

    let cached = overlay.cached_tiles_for_map_rect(&MapRect::world());
    assert_eq!(cached.len(), 1);
    assert!(overlay.current_frame_image(&TILE).is_none());

    tokio::task::yield_now().await;
    assert_eq!(source.call_count(), 0);
}

// =============================================================================
// Playback
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_animation_advances_once_per_frame_duration() {
    let source = MockTileSource::new();
    let (mut overlay, delegate) = loaded_overlay(&source, &["a", "b", "c"]).await;

    overlay.start_animating().unwrap();
    assert_eq!(delegate.states(), vec![(Stopped, Animating)]);

    overlay
        .run_until(Instant::now() + Duration::from_millis(3500))
        .await;

    assert_eq!(delegate.frames(), vec![1, 2, 0]);
    assert_eq!(overlay.current_frame_index(), 0);
    assert_eq!(overlay.state(), Animating);
}

#[tokio::test(start_paused = true)]
async fn test_scrub_stops_timer_and_resumes_animation() {
    let source = MockTileSource::new();
    let (mut overlay, delegate) = loaded_overlay(&source, &["a", "b", "c", "d"]).await;

    overlay.start_animating().unwrap();
    overlay.move_to_frame_index(2, true).unwrap();
    assert_eq!(overlay.state(), Scrubbing);
    assert_eq!(overlay.current_frame_index(), 2);

    // Timer is stopped while scrubbing
    overlay
        .run_until(Instant::now() + Duration::from_secs(5))
        .await;
    assert_eq!(overlay.current_frame_index(), 2);
    assert_eq!(delegate.frames(), vec![2]);

    overlay.move_to_frame_index(2, false).unwrap();
    assert_eq!(overlay.state(), Animating);

    overlay
        .run_until(Instant::now() + Duration::from_millis(1500))
        .await;
    assert_eq!(overlay.current_frame_index(), 3);
    assert_eq!(delegate.frames(), vec![2, 2, 3]);
    assert_eq!(
        delegate.states(),
        vec![
            (Stopped, Animating),
            (Animating, Scrubbing),
            (Scrubbing, Animating)
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_pause_while_scrubbing_resumes_stopped() {
    let source = MockTileSource::new();
    let (mut overlay, _delegate) = loaded_overlay(&source, &["a", "b", "c"]).await;

    overlay.start_animating().unwrap();
    overlay.move_to_frame_index(1, true).unwrap();
    overlay.pause_animating();
    assert_eq!(overlay.state(), Scrubbing);

    overlay.move_to_frame_index(2, false).unwrap();
    assert_eq!(overlay.state(), Stopped);
    assert_eq!(overlay.current_frame_index(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_pause_keeps_current_frame() {
    let source = MockTileSource::new();
    let (mut overlay, delegate) = loaded_overlay(&source, &["a", "b", "c"]).await;

    overlay.start_animating().unwrap();
    overlay
        .run_until(Instant::now() + Duration::from_millis(1500))
        .await;
    overlay.pause_animating();
    assert_eq!(overlay.state(), Stopped);
    assert_eq!(overlay.current_frame_index(), 1);

    overlay
        .run_until(Instant::now() + Duration::from_secs(3))
        .await;
    assert_eq!(delegate.frames(), vec![1]);

    // Start again from the paused frame
    overlay.start_animating().unwrap();
    overlay
        .run_until(Instant::now() + Duration::from_millis(1500))
        .await;
    assert_eq!(delegate.frames(), vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_fetch_while_animating_keeps_ticking() {
    let source = MockTileSource::with_delay(Duration::from_millis(2500));
    let delegate = RecordingDelegate::new();
    let mut overlay = overlay_with(&source, &["a", "b"]).with_delegate(delegate.clone());

    // Seed one tile so animation can start
    LoadLog::default().fetch(&mut overlay, one_tile(), TILE.z);
    overlay.wait_for_load().await;
    overlay.start_animating().unwrap();
    delegate.clear();

    let log = LoadLog::default();
    log.fetch(&mut overlay, two_tiles(), TILE.z);
    assert_eq!(overlay.state(), Loading);

    // The timer only runs while Animating
    overlay.start_animating().unwrap();
    assert_eq!(overlay.state(), Animating);
    overlay.wait_for_load().await;

    assert_eq!(log.outcomes().len(), 1);
    assert_eq!(overlay.state(), Animating);
    assert_eq!(delegate.frames(), vec![1, 0]);
}

#[tokio::test]
async fn test_start_and_move_errors_leave_state_unchanged() {
    let source = MockTileSource::new();
    let delegate = RecordingDelegate::new();
    let mut overlay = overlay_with(&source, &["a", "b"]).with_delegate(delegate.clone());

    assert!(matches!(
        overlay.start_animating(),
        Err(OverlayError::NothingToAnimate)
    ));
    assert!(matches!(
        overlay.move_to_frame_index(2, true),
        Err(OverlayError::OutOfBounds {
            index: 2,
            frame_count: 2
        })
    ));
    assert_eq!(overlay.state(), Stopped);
    assert!(delegate.events().is_empty());
}

#[tokio::test]
async fn test_stop_cancels_load_and_notifies_once() {
    let source = MockTileSource::new();
    let delegate = RecordingDelegate::new();
    let mut overlay = overlay_with(&source, &["hang"]).with_delegate(delegate.clone());

    LoadLog::default().fetch(&mut overlay, one_tile(), TILE.z);
    overlay.stop_animating();
    overlay.stop_animating();

    assert_eq!(overlay.state(), Stopped);
    assert_eq!(
        delegate.events(),
        vec![
            Recorded::State(Stopped, Loading),
            Recorded::State(Loading, Stopped)
        ]
    );
    assert_eq!(
        overlay.cache().get(&TILE).unwrap().slot_state(0),
        Some(SlotState::Empty)
    );
}
