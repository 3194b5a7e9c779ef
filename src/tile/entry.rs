//! A cached tile and its per-frame image slots.

use std::fmt;
use std::sync::Arc;

use image::DynamicImage;

use crate::coord::{map_rect, MapRect, TileCoordinate};
use crate::error::FetchError;
use crate::fetch::UrlTemplate;

/// A decoded tile image, shared between the cache and its readers.
pub type TileImage = Arc<DynamicImage>;

// =============================================================================
// Frame Slots
// =============================================================================

/// The contents of one frame of one tile.
#[derive(Debug, Clone)]
pub enum FrameSlot {
    /// Never fetched, or the last fetch was cancelled
    Empty,

    /// A fetch is outstanding
    InFlight,

    /// The frame's image is available
    Loaded(TileImage),

    /// The last fetch failed
    Failed(FetchError),
}

/// The state of a frame slot, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotState {
    Empty,
    InFlight,
    Loaded,
    Failed,
}

impl FrameSlot {
    pub fn state(&self) -> SlotState {
        match self {
            FrameSlot::Empty => SlotState::Empty,
            FrameSlot::InFlight => SlotState::InFlight,
            FrameSlot::Loaded(_) => SlotState::Loaded,
            FrameSlot::Failed(_) => SlotState::Failed,
        }
    }

    /// Loaded or failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FrameSlot::Loaded(_) | FrameSlot::Failed(_))
    }

    pub fn image(&self) -> Option<&TileImage> {
        match self {
            FrameSlot::Loaded(image) => Some(image),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&FetchError> {
        match self {
            FrameSlot::Failed(error) => Some(error),
            _ => None,
        }
    }
}

// =============================================================================
// Tile
// =============================================================================

/// One tile of the overlay with an image slot per animation frame.
///
/// The number of slots is fixed at creation. Slots only change through the
/// fetch pipeline: `Empty`/`Failed` -> `InFlight` when a fetch starts,
/// `InFlight` -> `Loaded`/`Failed` when it completes, and `InFlight` -> `Empty`
/// when it is cancelled.
#[derive(Debug, Clone)]
pub struct Tile {
    coordinate: TileCoordinate,
    map_rect: MapRect,
    instance: u64,
    slots: Box<[FrameSlot]>,
    templates: Arc<[UrlTemplate]>,
}

impl Tile {
    pub(crate) fn new(
        coordinate: TileCoordinate,
        instance: u64,
        templates: Arc<[UrlTemplate]>,
    ) -> Self {
        let slots = vec![FrameSlot::Empty; templates.len()].into_boxed_slice();
        Self {
            coordinate,
            map_rect: map_rect(coordinate),
            instance,
            slots,
            templates,
        }
    }

    pub fn coordinate(&self) -> TileCoordinate {
        self.coordinate
    }

    /// The map rect this tile covers.
    pub fn map_rect(&self) -> MapRect {
        self.map_rect
    }

    /// Identity of this particular cache entry. A tile recreated after a
    /// flush gets a new instance id.
    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn frame_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, frame_index: usize) -> Option<&FrameSlot> {
        self.slots.get(frame_index)
    }

    pub fn slot_state(&self, frame_index: usize) -> Option<SlotState> {
        self.slot(frame_index).map(FrameSlot::state)
    }

    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }

    /// The image for a frame, if it has loaded.
    pub fn image(&self, frame_index: usize) -> Option<&TileImage> {
        self.slot(frame_index).and_then(FrameSlot::image)
    }

    /// The URL this tile's image is fetched from for a frame.
    pub fn url_for_frame(&self, frame_index: usize) -> Option<String> {
        self.templates
            .get(frame_index)
            .map(|template| template.expand(self.coordinate))
    }

    /// Whether any frame of this tile failed to fetch.
    pub fn failed_to_fetch(&self) -> bool {
        self.slots.iter().any(|s| matches!(s, FrameSlot::Failed(_)))
    }

    pub fn loaded_frame_count(&self) -> usize {
        self.slots.iter().filter(|s| s.image().is_some()).count()
    }

    pub fn has_loaded_frame(&self) -> bool {
        self.slots.iter().any(|s| s.image().is_some())
    }

    /// Whether no frame is in flight.
    pub fn is_settled(&self) -> bool {
        !self.slots.iter().any(|s| matches!(s, FrameSlot::InFlight))
    }

    /// Mark a frame as being fetched. Only empty or failed slots can start a fetch.
    pub(crate) fn begin_fetch(&mut self, frame_index: usize) -> bool {
        match self.slots.get_mut(frame_index) {
            Some(slot) if matches!(slot, FrameSlot::Empty | FrameSlot::Failed(_)) => {
                *slot = FrameSlot::InFlight;
                true
            }
            _ => false,
        }
    }

    /// Record the outcome of a fetch. Ignored unless the slot is in flight.
    pub(crate) fn complete_fetch(
        &mut self,
        frame_index: usize,
        result: Result<TileImage, FetchError>,
    ) -> bool {
        match self.slots.get_mut(frame_index) {
            Some(slot) if matches!(slot, FrameSlot::InFlight) => {
                *slot = match result {
                    Ok(image) => FrameSlot::Loaded(image),
                    Err(error) => FrameSlot::Failed(error),
                };
                true
            }
            _ => false,
        }
    }

    /// Revert an in-flight slot to empty after its fetch was cancelled.
    pub(crate) fn reset_slot(&mut self, frame_index: usize) -> bool {
        match self.slots.get_mut(frame_index) {
            Some(slot) if matches!(slot, FrameSlot::InFlight) => {
                *slot = FrameSlot::Empty;
                true
            }
            _ => false,
        }
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tile {} covering origin ({}, {}) size ({}, {})",
            self.coordinate,
            self.map_rect.origin.x,
            self.map_rect.origin.y,
            self.map_rect.size.width,
            self.map_rect.size.height
        )
    }
}
