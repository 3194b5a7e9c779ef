//! Deduplicating, cancellable frame fetch pipeline.
//!
//! The pipeline turns "fetch frames F of tile T" requests into network
//! fetches, coalesces concurrent requests for the same (tile, frame), and
//! reports results back as an ordered stream of [`FetchEvent`]s.
//!
//! # Single writer
//!
//! Fetch tasks never touch the cache. Each spawned task sends its result over
//! an mpsc channel; the owner of the pipeline applies it to the
//! [`TileCache`] when it pulls the next event. All slot transitions therefore
//! happen on one logical context and need no locking.
//!
//! ```text
//!   fetch_frames ──▶ in_flight[FrameKey] ──spawn──▶ task: permit → fetch → decode
//!                          ▲                               │
//!                          │ waiters (batches)             │ Completion (mpsc)
//!                          │                               ▼
//!   next_event ◀── ready queue ◀── apply: slot write + FrameLoaded + BatchComplete
//! ```
//!
//! # Deduplication
//!
//! At most one task exists per [`FrameKey`]. A second request for a key that
//! is already being fetched attaches its batch as a waiter; both batches
//! observe the same result. Tasks are tracked by id, so a completion from a
//! cancelled or superseded task is recognized and dropped.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::TileSource;
use crate::coord::TileCoordinate;
use crate::error::FetchError;
use crate::tile::{FrameSlot, TileCache, TileDecoder, TileImage};

/// Default number of frame fetches allowed on the network at once.
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 8;

// =============================================================================
// Public Types
// =============================================================================

/// Identity of one frame of one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameKey {
    pub coordinate: TileCoordinate,
    pub frame_index: usize,
}

impl FrameKey {
    pub fn new(coordinate: TileCoordinate, frame_index: usize) -> Self {
        Self {
            coordinate,
            frame_index,
        }
    }
}

impl fmt::Display for FrameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.coordinate, self.frame_index)
    }
}

/// Handle of one `fetch_frames` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(u64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch-{}", self.0)
    }
}

/// Which outstanding work a cancel applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelScope {
    /// Every fetch and batch of one tile
    Tile(TileCoordinate),
    /// Everything
    All,
}

impl CancelScope {
    fn matches(&self, coordinate: &TileCoordinate) -> bool {
        match self {
            CancelScope::Tile(c) => c == coordinate,
            CancelScope::All => true,
        }
    }
}

/// Per-batch outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub requested: usize,
    pub loaded: usize,
    pub failed: usize,
}

/// A result reported by the pipeline.
///
/// For each batch, one `FrameLoaded` is emitted per requested frame, then
/// exactly one `BatchComplete`. A cancelled or released batch emits nothing
/// further. A failed network fetch is reported once as `FrameFailed`, ahead
/// of the `FrameLoaded` events of every batch waiting on it.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchEvent {
    /// A network fetch failed; emitted once per fetch, however many batches waited on it
    FrameFailed {
        coordinate: TileCoordinate,
        frame_index: usize,
        error: FetchError,
    },

    /// One frame of a batch reached a terminal state
    FrameLoaded {
        batch: BatchId,
        coordinate: TileCoordinate,
        frame_index: usize,
        error: Option<FetchError>,
    },

    /// Every frame of a batch reached a terminal state
    BatchComplete {
        batch: BatchId,
        coordinate: TileCoordinate,
        summary: BatchSummary,
    },
}

impl FetchEvent {
    /// The batch this event belongs to. `FrameFailed` belongs to none.
    pub fn batch(&self) -> Option<BatchId> {
        match self {
            FetchEvent::FrameLoaded { batch, .. } | FetchEvent::BatchComplete { batch, .. } => {
                Some(*batch)
            }
            FetchEvent::FrameFailed { .. } => None,
        }
    }

    pub fn coordinate(&self) -> TileCoordinate {
        match self {
            FetchEvent::FrameFailed { coordinate, .. }
            | FetchEvent::FrameLoaded { coordinate, .. }
            | FetchEvent::BatchComplete { coordinate, .. } => *coordinate,
        }
    }
}

// =============================================================================
// Internal Bookkeeping
// =============================================================================

/// One running fetch task.
struct InFlight {
    task_id: u64,
    /// Instance of the tile whose slot receives the result
    tile_instance: u64,
    token: CancellationToken,
    waiters: Vec<BatchId>,
}

struct Batch {
    coordinate: TileCoordinate,
    pending: HashSet<usize>,
    summary: BatchSummary,
}

/// Result sent back from a fetch task.
struct Completion {
    key: FrameKey,
    task_id: u64,
    result: Result<TileImage, FetchError>,
}

// =============================================================================
// Fetch Pipeline
// =============================================================================

/// Issues frame fetches for cached tiles and reports their results.
pub struct FetchPipeline {
    source: Arc<dyn TileSource>,
    decoder: TileDecoder,
    limiter: Arc<Semaphore>,

    in_flight: HashMap<FrameKey, InFlight>,
    batches: HashMap<BatchId, Batch>,
    ready: VecDeque<FetchEvent>,

    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,

    next_task: u64,
    next_batch: u64,
}

impl FetchPipeline {
    /// Create a pipeline fetching through `source`, with at most
    /// `max_concurrent_fetches` requests on the network at once.
    pub fn new(
        source: Arc<dyn TileSource>,
        decoder: TileDecoder,
        max_concurrent_fetches: usize,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            source,
            decoder,
            limiter: Arc::new(Semaphore::new(max_concurrent_fetches.max(1))),
            in_flight: HashMap::new(),
            batches: HashMap::new(),
            ready: VecDeque::new(),
            completions_tx,
            completions_rx,
            next_task: 0,
            next_batch: 0,
        }
    }

    pub fn source(&self) -> &Arc<dyn TileSource> {
        &self.source
    }

    /// Request frames of one tile.
    ///
    /// Frames already loaded complete immediately without network I/O.
    /// Frames already being fetched attach to the outstanding fetch. Empty
    /// and failed frames start a new fetch. Out-of-range and duplicate
    /// indices are ignored.
    ///
    /// Must be called from within a tokio runtime.
    pub fn fetch_frames(
        &mut self,
        cache: &mut TileCache,
        coordinate: TileCoordinate,
        frames: &[usize],
    ) -> BatchId {
        let batch_id = BatchId(self.next_batch);
        self.next_batch += 1;

        let mut batch = Batch {
            coordinate,
            pending: HashSet::new(),
            summary: BatchSummary::default(),
        };

        let tile = cache.entry(coordinate);
        let instance = tile.instance();
        let mut seen = HashSet::new();

        for &frame_index in frames {
            if frame_index >= tile.frame_count() || !seen.insert(frame_index) {
                continue;
            }
            batch.summary.requested += 1;
            let key = FrameKey::new(coordinate, frame_index);

            if matches!(tile.slot(frame_index), Some(FrameSlot::Loaded(_))) {
                batch.summary.loaded += 1;
                self.ready.push_back(FetchEvent::FrameLoaded {
                    batch: batch_id,
                    coordinate,
                    frame_index,
                    error: None,
                });
                continue;
            }

            match self.in_flight.get_mut(&key) {
                Some(entry) => {
                    if entry.tile_instance != instance {
                        // Task was started for a tile that has since been flushed
                        debug!(key = %key, "Retargeting in-flight fetch at recreated tile");
                        entry.tile_instance = instance;
                        tile.begin_fetch(frame_index);
                    } else {
                        debug!(key = %key, batch = %batch_id, "Attaching to in-flight fetch");
                    }
                    entry.waiters.push(batch_id);
                }
                None => {
                    // An InFlight slot with no task would never complete
                    tile.reset_slot(frame_index);
                    tile.begin_fetch(frame_index);
                    let url = tile.url_for_frame(frame_index).unwrap_or_default();
                    let entry = self.spawn_fetch(key, url, instance, batch_id);
                    self.in_flight.insert(key, entry);
                }
            }
            batch.pending.insert(frame_index);
        }

        if batch.pending.is_empty() {
            self.ready.push_back(FetchEvent::BatchComplete {
                batch: batch_id,
                coordinate,
                summary: batch.summary,
            });
        } else {
            self.batches.insert(batch_id, batch);
        }

        batch_id
    }

    fn spawn_fetch(
        &mut self,
        key: FrameKey,
        url: String,
        tile_instance: u64,
        waiter: BatchId,
    ) -> InFlight {
        let task_id = self.next_task;
        self.next_task += 1;

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let source = Arc::clone(&self.source);
        let decoder = self.decoder.clone();
        let limiter = Arc::clone(&self.limiter);
        let tx = self.completions_tx.clone();

        trace!(key = %key, url = %url, task_id = task_id, "Spawning frame fetch");

        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = cancelled.cancelled() => return,
                result = fetch_and_decode(source, decoder, limiter, &url) => result,
            };
            // Receiver is gone only when the pipeline was dropped
            let _ = tx.send(Completion {
                key,
                task_id,
                result,
            });
        });

        InFlight {
            task_id,
            tile_instance,
            token,
            waiters: vec![waiter],
        }
    }

    /// Next event, waiting for an outstanding fetch if none is ready.
    ///
    /// Returns `None` when nothing is queued and nothing is in flight.
    /// Cancel safe: if the future is dropped, no completion is lost.
    pub async fn next_event(&mut self, cache: &mut TileCache) -> Option<FetchEvent> {
        loop {
            if let Some(event) = self.ready.pop_front() {
                return Some(event);
            }
            if self.in_flight.is_empty() {
                return None;
            }
            let completion = self.completions_rx.recv().await?;
            self.apply(cache, completion);
        }
    }

    /// Next event if one is available without waiting.
    pub fn try_next_event(&mut self, cache: &mut TileCache) -> Option<FetchEvent> {
        loop {
            if let Some(event) = self.ready.pop_front() {
                return Some(event);
            }
            match self.completions_rx.try_recv() {
                Ok(completion) => self.apply(cache, completion),
                Err(_) => return None,
            }
        }
    }

    fn apply(&mut self, cache: &mut TileCache, completion: Completion) {
        let Completion {
            key,
            task_id,
            result,
        } = completion;

        let entry = match self.in_flight.get(&key) {
            Some(entry) if entry.task_id == task_id => entry,
            _ => {
                debug!(key = %key, task_id = task_id, "Dropping stale completion");
                return;
            }
        };
        let tile_instance = entry.tile_instance;
        let waiters = match self.in_flight.remove(&key) {
            Some(entry) => entry.waiters,
            None => return,
        };

        let error = result.as_ref().err().cloned();
        if let Some(ref e) = error {
            warn!(key = %key, error = %e, "Frame fetch failed");
            self.ready.push_back(FetchEvent::FrameFailed {
                coordinate: key.coordinate,
                frame_index: key.frame_index,
                error: e.clone(),
            });
        }

        match cache.get_mut(&key.coordinate) {
            Some(tile) if tile.instance() == tile_instance => {
                tile.complete_fetch(key.frame_index, result);
            }
            _ => debug!(key = %key, "Discarding result for flushed tile"),
        }

        for batch_id in waiters {
            let Some(batch) = self.batches.get_mut(&batch_id) else {
                continue;
            };
            if !batch.pending.remove(&key.frame_index) {
                continue;
            }
            if error.is_some() {
                batch.summary.failed += 1;
            } else {
                batch.summary.loaded += 1;
            }
            self.ready.push_back(FetchEvent::FrameLoaded {
                batch: batch_id,
                coordinate: key.coordinate,
                frame_index: key.frame_index,
                error: error.clone(),
            });

            if batch.pending.is_empty() {
                let summary = batch.summary;
                self.batches.remove(&batch_id);
                self.ready.push_back(FetchEvent::BatchComplete {
                    batch: batch_id,
                    coordinate: key.coordinate,
                    summary,
                });
            }
        }
    }

    /// Cancel outstanding fetches and batches in `scope`.
    ///
    /// In-flight slots revert to `Empty`; loaded and failed slots are kept.
    /// Cancelled batches emit no further events, including any already
    /// queued. Returns the number of cancelled fetches.
    pub fn cancel(&mut self, cache: &mut TileCache, scope: CancelScope) -> usize {
        let keys: Vec<FrameKey> = self
            .in_flight
            .keys()
            .filter(|key| scope.matches(&key.coordinate))
            .copied()
            .collect();

        for key in &keys {
            if let Some(entry) = self.in_flight.remove(key) {
                entry.token.cancel();
                if let Some(tile) = cache.get_mut(&key.coordinate) {
                    if tile.instance() == entry.tile_instance {
                        tile.reset_slot(key.frame_index);
                    }
                }
            }
        }

        let cancelled_batches: HashSet<BatchId> = self
            .batches
            .iter()
            .filter(|(_, batch)| scope.matches(&batch.coordinate))
            .map(|(id, _)| *id)
            .collect();
        self.batches.retain(|id, _| !cancelled_batches.contains(id));
        self.ready.retain(|event| !scope.matches(&event.coordinate()));

        if !keys.is_empty() || !cancelled_batches.is_empty() {
            debug!(
                scope = ?scope,
                fetches = keys.len(),
                batches = cancelled_batches.len(),
                "Cancelled fetches"
            );
        }
        keys.len()
    }

    /// Forget batches without cancelling their fetches.
    ///
    /// The fetches keep running and still fill their slots, and other
    /// batches may attach to them. The released batches emit no further
    /// events, including any already queued. Returns the number released.
    pub fn release_batches(&mut self, released: &HashSet<BatchId>) -> usize {
        let before = self.batches.len();
        self.batches.retain(|id, _| !released.contains(id));
        self.ready.retain(|event| {
            event
                .batch()
                .map_or(true, |batch| !released.contains(&batch))
        });
        let count = before - self.batches.len();
        if count > 0 {
            debug!(batches = count, "Released batches");
        }
        count
    }

    /// Cancel every fetch and batch for a tile outside `coverage`.
    ///
    /// Work for tiles inside `coverage` is untouched. Returns the number of
    /// cancelled fetches.
    pub fn retain_coverage(
        &mut self,
        cache: &mut TileCache,
        coverage: &[TileCoordinate],
    ) -> usize {
        let keep: HashSet<&TileCoordinate> = coverage.iter().collect();
        let outside: HashSet<TileCoordinate> = self
            .in_flight
            .keys()
            .map(|key| key.coordinate)
            .chain(self.batches.values().map(|batch| batch.coordinate))
            .filter(|coordinate| !keep.contains(coordinate))
            .collect();

        outside
            .into_iter()
            .map(|coordinate| self.cancel(cache, CancelScope::Tile(coordinate)))
            .sum()
    }

    /// Whether no events are queued and no fetch is outstanding.
    pub fn is_idle(&self) -> bool {
        self.ready.is_empty() && self.in_flight.is_empty()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn pending_batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn is_in_flight(&self, key: &FrameKey) -> bool {
        self.in_flight.contains_key(key)
    }
}

impl Drop for FetchPipeline {
    fn drop(&mut self) {
        for entry in self.in_flight.values() {
            entry.token.cancel();
        }
    }
}

async fn fetch_and_decode(
    source: Arc<dyn TileSource>,
    decoder: TileDecoder,
    limiter: Arc<Semaphore>,
    url: &str,
) -> Result<TileImage, FetchError> {
    let _permit = limiter
        .acquire_owned()
        .await
        .map_err(|_| FetchError::Transport {
            url: url.to_string(),
            message: "fetch limiter closed".to_string(),
        })?;
    let payload = source.fetch(url).await?;
    decoder.decode(url, &payload)
}
