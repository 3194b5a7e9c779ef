//! Tile cache keyed by tile coordinate.
//!
//! The cache owns every [`Tile`] of the overlay. Lookups go by
//! [`TileCoordinate`] value and a miss creates the tile, so a lookup never
//! comes back empty-handed.
//!
//! # Eviction
//!
//! There is no size-based or LRU eviction. The working set stays bounded
//! because callers only ever ask for the currently visible rect; tiles leave
//! the cache when the visible set changes ([`TileCache::retain_coverage`]) or
//! on an explicit [`TileCache::flush`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::coord::{tile_coordinate, zoom_level, MapRect, TileCoordinate};
use crate::fetch::UrlTemplate;

use super::entry::Tile;

// =============================================================================
// Tile Cache
// =============================================================================

/// Owner of all cached tiles.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tile_animator::coord::{map_rect, zoom_scale, TileCoordinate};
/// use tile_animator::fetch::UrlTemplate;
/// use tile_animator::tile::TileCache;
///
/// let templates: Arc<[UrlTemplate]> = vec![
///     UrlTemplate::new("https://radar.example.com/t0/{z}/{x}/{y}.png"),
///     UrlTemplate::new("https://radar.example.com/t1/{z}/{x}/{y}.png"),
/// ]
/// .into();
/// let mut cache = TileCache::new(templates);
///
/// let coordinate = TileCoordinate::new(3, 5, 4);
/// let tile = cache.tile_for_map_rect(&map_rect(coordinate), zoom_scale(4));
/// assert_eq!(tile.coordinate(), coordinate);
/// assert_eq!(tile.frame_count(), 2);
/// assert_eq!(cache.len(), 1);
/// ```
#[derive(Debug)]
pub struct TileCache {
    /// Cached tiles by coordinate
    tiles: HashMap<TileCoordinate, Tile>,

    /// Per-frame templates shared by every tile
    templates: Arc<[UrlTemplate]>,

    /// Instance id handed to the next created tile
    next_instance: u64,
}

impl TileCache {
    /// Create an empty cache whose tiles have one slot per template.
    pub fn new(templates: Arc<[UrlTemplate]>) -> Self {
        Self {
            tiles: HashMap::new(),
            templates,
            next_instance: 0,
        }
    }

    /// Number of frame slots every tile has.
    pub fn frame_count(&self) -> usize {
        self.templates.len()
    }

    pub fn templates(&self) -> &Arc<[UrlTemplate]> {
        &self.templates
    }

    /// Get the tile for a map rect at a zoom scale, creating it on a miss.
    pub fn tile_for_map_rect(&mut self, rect: &MapRect, zoom_scale: f64) -> &Tile {
        let coordinate = tile_coordinate(rect, zoom_level(zoom_scale));
        self.tile_for_coordinate(coordinate)
    }

    /// Get the tile for a coordinate, creating it on a miss.
    pub fn tile_for_coordinate(&mut self, coordinate: TileCoordinate) -> &Tile {
        self.entry(coordinate)
    }

    /// Mutable access for the fetch pipeline, creating the tile on a miss.
    pub(crate) fn entry(&mut self, coordinate: TileCoordinate) -> &mut Tile {
        let templates = &self.templates;
        let next_instance = &mut self.next_instance;
        self.tiles.entry(coordinate).or_insert_with(|| {
            let instance = *next_instance;
            *next_instance += 1;
            Tile::new(coordinate, instance, Arc::clone(templates))
        })
    }

    /// Look up a tile without creating it.
    pub fn get(&self, coordinate: &TileCoordinate) -> Option<&Tile> {
        self.tiles.get(coordinate)
    }

    pub(crate) fn get_mut(&mut self, coordinate: &TileCoordinate) -> Option<&mut Tile> {
        self.tiles.get_mut(coordinate)
    }

    pub fn contains(&self, coordinate: &TileCoordinate) -> bool {
        self.tiles.contains_key(coordinate)
    }

    /// All cached tiles whose bounds intersect `rect`, at any zoom level.
    ///
    /// Never fetches. Intended for renderers drawing over- or under-zoomed
    /// content from whatever is already cached. Sorted by zoom, then row, then column.
    pub fn cached_tiles(&self, rect: &MapRect) -> Vec<&Tile> {
        let mut tiles: Vec<&Tile> = self
            .tiles
            .values()
            .filter(|tile| tile.map_rect().intersects(rect))
            .collect();
        tiles.sort_by_key(|tile| tile.coordinate());
        tiles
    }

    /// Drop every tile whose coordinate is not in `coverage`.
    ///
    /// Returns the number of evicted tiles.
    pub fn retain_coverage(&mut self, coverage: &[TileCoordinate]) -> usize {
        let keep: HashSet<&TileCoordinate> = coverage.iter().collect();
        let before = self.tiles.len();
        self.tiles.retain(|coordinate, _| keep.contains(coordinate));
        before - self.tiles.len()
    }

    /// Remove every tile.
    ///
    /// Outstanding fetches are not cancelled. They complete into the dropped
    /// tiles and are discarded; a later lookup creates a fresh tile.
    pub fn flush(&mut self) {
        self.tiles.clear();
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.values()
    }
}

// =============================================================================
// Tests
// =============================================================================
