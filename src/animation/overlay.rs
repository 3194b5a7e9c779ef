//! The animation overlay: cache, fetch pipeline and playback state machine.
//!
//! # State machine
//!
//! ```text
//!              fetch_tiles_for_map_rect
//!   Stopped ───────────────────────────▶ Loading
//!      ▲  ▲                                │  │
//!      │  └──────── load completes ────────┘  │ start_animating
//!      │                                      ▼
//!      │ pause/stop     start_animating   Animating ◀─┐
//!      └──────────────────────────────────────┘       │ move_to_frame_index(_, false)
//!                                                     │ (resumes previous mode)
//!   any state ── move_to_frame_index(_, true) ──▶ Scrubbing
//! ```
//!
//! While Animating a timer advances the current frame every
//! `frame_duration`. Scrubbing stops the timer and remembers whether to
//! resume it.
//!
//! # Driving the overlay
//!
//! The overlay owns all of its state and is advanced by its owner calling
//! [`AnimationOverlay::process_next`] (or one of the helpers built on it).
//! Each call applies exactly one fetch result or one timer tick, and all
//! delegate callbacks, progress handlers and completion handlers run inside
//! these calls.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::delegate::AnimationDelegate;
use super::state::{AnimationState, Playback, ResumeMode, TileServingMode};
use crate::config::OverlayConfig;
use crate::coord::{covering_tile_count, tiles_covering, zoom_level, MapRect, TileCoordinate};
use crate::error::{FetchError, OverlayError};
use crate::fetch::{
    BatchId, CancelScope, FetchEvent, FetchPipeline, HttpTileSource, TileSource, UrlTemplate,
};
use crate::tile::{FrameSlot, Tile, TileCache, TileDecoder, TileImage};

/// Called with a frame index once that frame has finished for every tile of a load.
pub type ProgressHandler = Box<dyn FnMut(usize) + Send>;

/// Called once when a load finishes. Not called for cancelled or superseded loads.
pub type CompletionHandler = Box<dyn FnOnce(LoadOutcome) + Send>;

// =============================================================================
// Load Results
// =============================================================================

/// One frame of one tile that failed during a load.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameFailure {
    pub coordinate: TileCoordinate,
    pub frame_index: usize,
    pub error: FetchError,
}

/// Result of a [`AnimationOverlay::fetch_tiles_for_map_rect`] load.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOutcome {
    /// Every covering tile has the current frame loaded
    pub success: bool,

    /// Number of frames loaded for every covering tile
    pub loaded_frames: usize,

    pub failures: Vec<FrameFailure>,
}

/// The region most recently requested by `fetch_tiles_for_map_rect`.
#[derive(Debug, Clone)]
struct VisibleRegion {
    rect: MapRect,
    zoom_level: u32,
    tiles: Vec<TileCoordinate>,
}

/// An outstanding `fetch_tiles_for_map_rect` request.
struct LoadJob {
    batches: HashSet<BatchId>,
    /// Per frame, number of tiles that have not finished it yet
    frame_pending: Vec<usize>,
    progress: ProgressHandler,
    completion: CompletionHandler,
    failures: Vec<FrameFailure>,
}

/// What one `process_next` call woke up for.
enum Step {
    Fetch(Option<FetchEvent>),
    Tick,
}

// =============================================================================
// Animation Overlay
// =============================================================================

/// An animated tile overlay.
pub struct AnimationOverlay {
    config: OverlayConfig,
    cache: TileCache,
    pipeline: FetchPipeline,
    playback: Playback,
    current_frame: usize,
    delegate: Option<Box<dyn AnimationDelegate>>,
    visible: Option<VisibleRegion>,
    load: Option<LoadJob>,
}

impl AnimationOverlay {
    /// Create an overlay fetching over HTTP with the configured session.
    ///
    /// # Errors
    ///
    /// [`OverlayError::NoFrames`] with zero template URLs,
    /// [`OverlayError::InvalidConfig`] for any other invalid setting.
    pub fn new(config: OverlayConfig) -> Result<Self, OverlayError> {
        config.validate()?;
        let source = HttpTileSource::new(&config.session)?;
        Self::with_source(config, Arc::new(source))
    }

    /// Create an overlay fetching through a custom source.
    pub fn with_source(
        config: OverlayConfig,
        source: Arc<dyn TileSource>,
    ) -> Result<Self, OverlayError> {
        config.validate()?;

        let templates: Arc<[UrlTemplate]> = config.template_urls.iter().cloned().collect();
        let pipeline = FetchPipeline::new(
            source,
            TileDecoder::new(config.tile_size),
            config.max_concurrent_fetches,
        );

        Ok(Self {
            cache: TileCache::new(templates),
            pipeline,
            playback: Playback::Stopped,
            current_frame: 0,
            delegate: None,
            visible: None,
            load: None,
            config,
        })
    }

    pub fn with_delegate(mut self, delegate: impl AnimationDelegate + 'static) -> Self {
        self.set_delegate(delegate);
        self
    }

    pub fn set_delegate(&mut self, delegate: impl AnimationDelegate + 'static) {
        self.delegate = Some(Box::new(delegate));
    }

    pub fn clear_delegate(&mut self) {
        self.delegate = None;
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn state(&self) -> AnimationState {
        self.playback.state()
    }

    pub fn serving_mode(&self) -> TileServingMode {
        self.state().serving_mode()
    }

    pub fn current_frame_index(&self) -> usize {
        self.current_frame
    }

    pub fn frame_count(&self) -> usize {
        self.config.frame_count()
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    /// Whether a `fetch_tiles_for_map_rect` load is outstanding.
    pub fn is_loading(&self) -> bool {
        self.load.is_some()
    }

    pub fn visible_map_rect(&self) -> Option<MapRect> {
        self.visible.as_ref().map(|v| v.rect)
    }

    pub fn visible_zoom_level(&self) -> Option<u32> {
        self.visible.as_ref().map(|v| v.zoom_level)
    }

    /// Tiles covering the most recently fetched region.
    pub fn visible_tiles(&self) -> &[TileCoordinate] {
        self.visible.as_ref().map(|v| v.tiles.as_slice()).unwrap_or(&[])
    }

    // -------------------------------------------------------------------------
    // Fetching
    // -------------------------------------------------------------------------

    /// Fetch every frame of every tile covering `rect` at `zoom_level`.
    ///
    /// Replaces any load in progress: its completion handler is never called.
    /// Its fetches for tiles that are still covered keep running and are
    /// shared with the new load; fetches for other tiles are cancelled and
    /// those tiles are evicted. Moves to Loading unless Scrubbing.
    ///
    /// `progress` is called with each frame index once that frame is
    /// finished (loaded or failed) for every covering tile. `completion` is
    /// called once after all frames of all tiles are finished.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`OverlayError::InvalidZoomLevel`] if `zoom_level` is outside the
    /// configured range, [`OverlayError::TooManyTiles`] if `rect` covers more
    /// than `max_visible_tiles` tiles. Nothing changes in either case.
    pub fn fetch_tiles_for_map_rect<P, C>(
        &mut self,
        rect: MapRect,
        zoom_level: u32,
        progress: P,
        completion: C,
    ) -> Result<(), OverlayError>
    where
        P: FnMut(usize) + Send + 'static,
        C: FnOnce(LoadOutcome) + Send + 'static,
    {
        self.config.check_region(&rect, zoom_level)?;

        if let Some(previous) = self.load.take() {
            let released = self.pipeline.release_batches(&previous.batches);
            debug!(batches = released, "Superseding outstanding load");
        }

        let tiles = tiles_covering(&rect, zoom_level);
        let cancelled = self.pipeline.retain_coverage(&mut self.cache, &tiles);
        let evicted = self.cache.retain_coverage(&tiles);
        let frame_count = self.frame_count();
        let frames: Vec<usize> = (0..frame_count).collect();

        info!(
            zoom_level = zoom_level,
            tiles = tiles.len(),
            frames = frame_count,
            evicted = evicted,
            cancelled = cancelled,
            "Fetching tiles for map rect"
        );

        let mut batches = HashSet::with_capacity(tiles.len());
        for coordinate in &tiles {
            batches.insert(self.pipeline.fetch_frames(&mut self.cache, *coordinate, &frames));
        }

        self.visible = Some(VisibleRegion {
            rect,
            zoom_level,
            tiles: tiles.clone(),
        });
        self.load = Some(LoadJob {
            batches,
            frame_pending: vec![tiles.len(); frame_count],
            progress: Box::new(progress),
            completion: Box::new(completion),
            failures: Vec::new(),
        });

        if tiles.is_empty() {
            self.finish_load();
            return Ok(());
        }

        if !matches!(self.playback, Playback::Scrubbing { .. }) {
            self.transition(Playback::Loading);
        }
        Ok(())
    }

    /// Same as [`fetch_tiles_for_map_rect`](Self::fetch_tiles_for_map_rect)
    /// with the zoom given as a zoom scale.
    pub fn fetch_tiles_for_map_rect_at_scale<P, C>(
        &mut self,
        rect: MapRect,
        zoom_scale: f64,
        progress: P,
        completion: C,
    ) -> Result<(), OverlayError>
    where
        P: FnMut(usize) + Send + 'static,
        C: FnOnce(LoadOutcome) + Send + 'static,
    {
        self.fetch_tiles_for_map_rect(rect, zoom_level(zoom_scale), progress, completion)
    }

    /// Cancel the outstanding load, if any.
    ///
    /// In-flight frames revert to empty and the load's completion handler is
    /// never called. Loading moves to Stopped.
    pub fn cancel_loading(&mut self) {
        let cancelled = self.pipeline.cancel(&mut self.cache, CancelScope::All);
        if self.load.take().is_some() || cancelled > 0 {
            debug!(fetches = cancelled, "Cancelled loading");
        }
        if matches!(self.playback, Playback::Loading) {
            self.transition(Playback::Stopped);
        }
    }

    /// Remove every cached tile.
    ///
    /// Outstanding fetches keep running; a tile requested again before they
    /// finish receives their results.
    pub fn flush_tile_cache(&mut self) {
        debug!(tiles = self.cache.len(), "Flushing tile cache");
        self.cache.flush();
    }

    // -------------------------------------------------------------------------
    // Tile Lookup
    // -------------------------------------------------------------------------

    /// The cached tile for a map rect at a zoom scale, created if missing. Never fetches.
    pub fn tile_for_map_rect(&mut self, rect: &MapRect, zoom_scale: f64) -> &Tile {
        self.cache.tile_for_map_rect(rect, zoom_scale)
    }

    /// All cached tiles intersecting `rect`, at any zoom. Never fetches.
    pub fn cached_tiles_for_map_rect(&self, rect: &MapRect) -> Vec<&Tile> {
        self.cache.cached_tiles(rect)
    }

    /// The current frame's image for a tile, if cached.
    pub fn current_frame_image(&self, coordinate: &TileCoordinate) -> Option<TileImage> {
        self.cache
            .get(coordinate)
            .and_then(|tile| tile.image(self.current_frame))
            .cloned()
    }

    /// Whether every tile covering `rect` is cached, settled and has a
    /// loaded frame. Always false for a region over the tile limit.
    pub fn can_animate_for_map_rect(&self, rect: &MapRect, zoom_level: u32) -> bool {
        if covering_tile_count(rect, zoom_level) > self.config.max_visible_tiles as u64 {
            return false;
        }
        let tiles = tiles_covering(rect, zoom_level);
        !tiles.is_empty()
            && tiles.iter().all(|coordinate| {
                self.cache
                    .get(coordinate)
                    .is_some_and(|tile| tile.is_settled() && tile.has_loaded_frame())
            })
    }

    /// Load the current frame of one tile through the fetch pipeline.
    ///
    /// This is the live path used while Stopped or Loading. Requests for a
    /// frame that is already being fetched share that fetch. Other fetch
    /// results arriving meanwhile are applied as usual.
    ///
    /// # Errors
    ///
    /// [`OverlayError::InvalidZoomLevel`] for a tile outside the zoom range,
    /// [`OverlayError::Fetch`] if the frame failed, and
    /// [`OverlayError::LoadCancelled`] if the tile was flushed before its
    /// result arrived.
    pub async fn load_tile(
        &mut self,
        coordinate: TileCoordinate,
    ) -> Result<TileImage, OverlayError> {
        self.config.check_zoom_level(coordinate.z)?;

        let frame_index = self.current_frame;
        let batch = self
            .pipeline
            .fetch_frames(&mut self.cache, coordinate, &[frame_index]);

        loop {
            let event = self
                .pipeline
                .next_event(&mut self.cache)
                .await
                .ok_or(OverlayError::LoadCancelled)?;
            let done = matches!(&event, FetchEvent::BatchComplete { batch: b, .. } if *b == batch);
            self.handle_fetch_event(event);
            if done {
                break;
            }
        }

        match self.cache.get(&coordinate).and_then(|t| t.slot(frame_index)) {
            Some(FrameSlot::Loaded(image)) => Ok(Arc::clone(image)),
            Some(FrameSlot::Failed(error)) => Err(error.clone().into()),
            _ => Err(OverlayError::LoadCancelled),
        }
    }

    // -------------------------------------------------------------------------
    // Playback
    // -------------------------------------------------------------------------

    /// Start the frame timer.
    ///
    /// From Scrubbing this ends scrubbing and resumes animation. Calling it
    /// while Animating does nothing. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`OverlayError::NothingToAnimate`] if no frame is cached for the
    /// current view. The state is unchanged.
    pub fn start_animating(&mut self) -> Result<(), OverlayError> {
        if matches!(self.playback, Playback::Animating { .. }) {
            return Ok(());
        }

        let has_frame = self.visible_tiles().iter().any(|coordinate| {
            self.cache
                .get(coordinate)
                .is_some_and(|tile| tile.has_loaded_frame())
        });
        if !has_frame {
            return Err(OverlayError::NothingToAnimate);
        }

        let playback = self.animating();
        self.transition(playback);
        Ok(())
    }

    /// Stop the frame timer, keeping the current frame.
    ///
    /// From Scrubbing, the mode resumed when scrubbing ends becomes stopped.
    /// A load in progress continues.
    pub fn pause_animating(&mut self) {
        match self.playback {
            Playback::Animating { .. } => {
                let idle = self.idle();
                self.transition(idle);
            }
            Playback::Scrubbing { ref mut resume } => *resume = ResumeMode::Stopped,
            Playback::Stopped | Playback::Loading => {}
        }
    }

    /// Stop everything: cancel any load and move to Stopped.
    pub fn stop_animating(&mut self) {
        self.cancel_loading();
        self.transition(Playback::Stopped);
    }

    /// Jump to a frame.
    ///
    /// With `continuous` set this enters Scrubbing, stopping the timer and
    /// remembering whether it was running. Without it, Scrubbing ends and the
    /// remembered mode resumes; while Animating the timer is stopped.
    ///
    /// # Errors
    ///
    /// [`OverlayError::OutOfBounds`] if `frame_index` is not below the frame
    /// count. Nothing changes in that case.
    pub fn move_to_frame_index(
        &mut self,
        frame_index: usize,
        continuous: bool,
    ) -> Result<(), OverlayError> {
        let frame_count = self.frame_count();
        if frame_index >= frame_count {
            return Err(OverlayError::OutOfBounds {
                index: frame_index,
                frame_count,
            });
        }

        let next = match (&self.playback, continuous) {
            (Playback::Scrubbing { .. }, true) => None,
            (Playback::Animating { .. }, true) => Some(Playback::Scrubbing {
                resume: ResumeMode::Animating,
            }),
            (_, true) => Some(Playback::Scrubbing {
                resume: ResumeMode::Stopped,
            }),
            (Playback::Scrubbing { resume }, false) => Some(match resume {
                ResumeMode::Animating => self.animating(),
                ResumeMode::Stopped => self.idle(),
            }),
            (Playback::Animating { .. }, false) => Some(self.idle()),
            (Playback::Stopped | Playback::Loading, false) => None,
        };
        if let Some(next) = next {
            self.transition(next);
        }

        self.current_frame = frame_index;
        if let Some(delegate) = self.delegate.as_mut() {
            delegate.did_animate_frame(frame_index);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Event Driver
    // -------------------------------------------------------------------------

    /// Apply the next fetch result or timer tick, waiting for one if needed.
    ///
    /// Returns `false` without waiting when there is nothing to wait for:
    /// no fetch outstanding and not animating. Cancel safe.
    pub async fn process_next(&mut self) -> bool {
        let step = {
            let idle = self.pipeline.is_idle();
            let Self {
                pipeline,
                cache,
                playback,
                ..
            } = self;

            match playback {
                Playback::Animating { ticker } if idle => {
                    ticker.tick().await;
                    Step::Tick
                }
                Playback::Animating { ticker } => {
                    tokio::select! {
                        biased;
                        event = pipeline.next_event(cache) => Step::Fetch(event),
                        _ = ticker.tick() => Step::Tick,
                    }
                }
                _ if idle => return false,
                _ => Step::Fetch(pipeline.next_event(cache).await),
            }
        };

        match step {
            Step::Fetch(Some(event)) => self.handle_fetch_event(event),
            Step::Fetch(None) => {}
            Step::Tick => self.advance_frame(),
        }
        true
    }

    /// Apply every fetch result that is ready now, without waiting.
    ///
    /// Timer ticks are not processed. Returns the number of applied results.
    pub fn process_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Some(event) = self.pipeline.try_next_event(&mut self.cache) {
            self.handle_fetch_event(event);
            applied += 1;
        }
        applied
    }

    /// Drive the overlay until the outstanding load finishes.
    ///
    /// Timer ticks keep being applied while waiting. Returns immediately if
    /// nothing is loading.
    pub async fn wait_for_load(&mut self) {
        while self.load.is_some() {
            if !self.process_next().await {
                break;
            }
        }
    }

    /// Drive the overlay until `deadline`.
    pub async fn run_until(&mut self, deadline: Instant) {
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;
                _ = &mut sleep => break,
                progressed = self.process_next() => {
                    if !progressed {
                        (&mut sleep).await;
                        break;
                    }
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// A fresh Animating state whose first tick is one frame duration away.
    fn animating(&self) -> Playback {
        let period = self.config.frame_duration;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Playback::Animating { ticker }
    }

    /// The non-animating state: Loading while a load is outstanding, else Stopped.
    fn idle(&self) -> Playback {
        if self.load.is_some() {
            Playback::Loading
        } else {
            Playback::Stopped
        }
    }

    fn transition(&mut self, next: Playback) {
        let previous = self.playback.state();
        self.playback = next;
        let current = self.playback.state();

        if previous != current {
            debug!(from = %previous, to = %current, "Animation state changed");
            if let Some(delegate) = self.delegate.as_mut() {
                delegate.did_change_state(previous, current);
            }
        }
    }

    fn advance_frame(&mut self) {
        let frame_count = self.frame_count();
        if frame_count == 0 {
            return;
        }
        self.current_frame = (self.current_frame + 1) % frame_count;
        if let Some(delegate) = self.delegate.as_mut() {
            delegate.did_animate_frame(self.current_frame);
        }
    }

    fn handle_fetch_event(&mut self, event: FetchEvent) {
        match event {
            FetchEvent::FrameFailed { error, .. } => {
                if let Some(delegate) = self.delegate.as_mut() {
                    delegate.did_have_error(&error);
                }
            }
            FetchEvent::FrameLoaded {
                batch,
                coordinate,
                frame_index,
                error,
            } => {
                let Some(load) = self.load.as_mut() else {
                    return;
                };
                if !load.batches.contains(&batch) {
                    return;
                }
                if let Some(error) = error {
                    load.failures.push(FrameFailure {
                        coordinate,
                        frame_index,
                        error,
                    });
                }
                if let Some(remaining) = load.frame_pending.get_mut(frame_index) {
                    *remaining = remaining.saturating_sub(1);
                    if *remaining == 0 {
                        (load.progress)(frame_index);
                    }
                }
            }
            FetchEvent::BatchComplete { batch, .. } => {
                let finished = match self.load.as_mut() {
                    Some(load) => load.batches.remove(&batch) && load.batches.is_empty(),
                    None => false,
                };
                if finished {
                    self.finish_load();
                }
            }
        }
    }

    fn finish_load(&mut self) {
        let Some(load) = self.load.take() else {
            return;
        };

        let tiles = self.visible_tiles();
        let frame_loaded_everywhere = |frame_index: usize| {
            tiles.iter().all(|coordinate| {
                self.cache
                    .get(coordinate)
                    .is_some_and(|tile| tile.image(frame_index).is_some())
            })
        };
        let loaded_frames = (0..self.frame_count())
            .filter(|&f| frame_loaded_everywhere(f))
            .count();
        let success = frame_loaded_everywhere(self.current_frame);

        info!(
            success = success,
            loaded_frames = loaded_frames,
            failures = load.failures.len(),
            "Tile load complete"
        );

        if matches!(self.playback, Playback::Loading) {
            self.transition(Playback::Stopped);
        }

        (load.completion)(LoadOutcome {
            success,
            loaded_frames,
            failures: load.failures,
        });
    }
}

impl std::fmt::Debug for AnimationOverlay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnimationOverlay")
            .field("state", &self.state())
            .field("current_frame", &self.current_frame)
            .field("frame_count", &self.frame_count())
            .field("cached_tiles", &self.cache.len())
            .field("in_flight", &self.pipeline.in_flight_count())
            .field("loading", &self.load.is_some())
            .finish()
    }
}
