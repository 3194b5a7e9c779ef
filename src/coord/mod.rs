//! Map-space geometry and tile coordinate math.
//!
//! Map space is the linear Web Mercator plane used by the host map framework:
//! the whole world is a square of [`MAP_WORLD_SIZE`] map points per side, with
//! the origin at the top-left (north-west) corner. At zoom level `z` the world
//! is cut into `2^z x 2^z` tiles, so a tile always covers a power-of-two number
//! of map points and every conversion below is exact in `f64`.
//!
//! The host describes what it shows as a [`MapRect`] plus a continuous zoom
//! scale (screen points per map point). [`zoom_level`] folds that scale onto
//! the discrete tiling level; [`tile_coordinate`] and [`map_rect`] convert
//! between rects and tile coordinates.
//!
//! ```
//! use tile_animator::coord::{map_rect, tile_coordinate, TileCoordinate};
//!
//! let tile = TileCoordinate::new(5, 11, 5);
//! assert_eq!(tile_coordinate(&map_rect(tile), tile.z), tile);
//! ```

use std::f64::consts::PI;
use std::fmt;

/// Width and height of the projected world, in map points (`2^28`).
pub const MAP_WORLD_SIZE: f64 = 268_435_456.0;

/// Zoom level at which one map point is one pixel of a 256px tile.
///
/// This is `log2(MAP_WORLD_SIZE / 256)`, the anchor of the scale/level relation.
pub const REFERENCE_ZOOM_LEVEL: u32 = 20;

/// Deepest zoom level the tile math supports. At this level a tile spans one map point.
pub const MAX_TILE_ZOOM: u32 = 28;

/// Latitude limit of the spherical mercator projection.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Slack applied before flooring a computed zoom level, so exact powers of two
/// do not drop a level due to `log2` rounding.
const ZOOM_EPSILON: f64 = 1e-9;

// =============================================================================
// Map Space Primitives
// =============================================================================

/// A point in map space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MapPoint {
    pub x: f64,
    pub y: f64,
}

impl MapPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A size in map points.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MapSize {
    pub width: f64,
    pub height: f64,
}

impl MapSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// An axis-aligned rectangle in map space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MapRect {
    pub origin: MapPoint,
    pub size: MapSize,
}

impl MapRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            origin: MapPoint::new(x, y),
            size: MapSize::new(width, height),
        }
    }

    /// The rect covering the whole world.
    pub fn world() -> Self {
        Self::new(0.0, 0.0, MAP_WORLD_SIZE, MAP_WORLD_SIZE)
    }

    /// Build the rect spanned by two corner points, in any order.
    pub fn from_corners(a: MapPoint, b: MapPoint) -> Self {
        let min_x = a.x.min(b.x);
        let min_y = a.y.min(b.y);
        Self::new(min_x, min_y, a.x.max(b.x) - min_x, a.y.max(b.y) - min_y)
    }

    /// Build the rect covering a geographic region.
    ///
    /// `center` is the middle of the region; the spans are the full height
    /// and width of the region in degrees.
    pub fn from_region(center: LatLng, lat_span: f64, lng_span: f64) -> Self {
        let north_west = LatLng::new(center.lat + lat_span / 2.0, center.lng - lng_span / 2.0);
        let south_east = LatLng::new(center.lat - lat_span / 2.0, center.lng + lng_span / 2.0);
        Self::from_corners(north_west.to_map_point(), south_east.to_map_point())
    }

    pub fn min_x(&self) -> f64 {
        self.origin.x
    }

    pub fn min_y(&self) -> f64 {
        self.origin.y
    }

    pub fn max_x(&self) -> f64 {
        self.origin.x + self.size.width
    }

    pub fn max_y(&self) -> f64 {
        self.origin.y + self.size.height
    }

    /// A rect with no area.
    pub fn is_empty(&self) -> bool {
        !(self.size.width > 0.0 && self.size.height > 0.0)
    }

    /// Whether the two rects share some area. Touching edges do not count.
    pub fn intersects(&self, other: &MapRect) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        self.min_x() < other.max_x()
            && other.min_x() < self.max_x()
            && self.min_y() < other.max_y()
            && other.min_y() < self.max_y()
    }
}

/// A geographic coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Project onto map space. Latitude is clamped to the mercator limit.
    pub fn to_map_point(&self) -> MapPoint {
        let lat = self.lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
        let x = (self.lng + 180.0) / 360.0;
        let sin = lat.sin();
        let y = 0.5 - ((1.0 + sin) / (1.0 - sin)).ln() / (4.0 * PI);
        MapPoint::new(x * MAP_WORLD_SIZE, y * MAP_WORLD_SIZE)
    }

    /// Inverse of [`LatLng::to_map_point`].
    pub fn from_map_point(point: MapPoint) -> Self {
        let lng = point.x / MAP_WORLD_SIZE * 360.0 - 180.0;
        let n = PI - 2.0 * PI * point.y / MAP_WORLD_SIZE;
        let lat = n.sinh().atan().to_degrees();
        Self::new(lat, lng)
    }
}

/// A top-left point in mercator space normalized to `[0, 1)` on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MercatorPoint {
    pub x: f64,
    pub y: f64,
}

// =============================================================================
// Tile Coordinate
// =============================================================================

/// Identifies one tile at one zoom level. Used as the tile cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoordinate {
    /// Zoom level
    pub z: u32,

    /// Row, counted from the north edge
    pub y: u32,

    /// Column, counted from the antimeridian eastwards
    pub x: u32,
}

impl TileCoordinate {
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Self { z, y, x }
    }

    /// Whether the coordinate addresses an existing tile of its zoom level.
    pub fn is_valid(&self) -> bool {
        if self.z > MAX_TILE_ZOOM {
            return false;
        }
        let width = world_tile_width(self.z);
        self.x < width && self.y < width
    }
}

impl fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

// =============================================================================
// Conversions
// =============================================================================

/// Discrete tiling level for a continuous zoom scale.
///
/// The host scale doubles with every level and equals `1.0` at
/// [`REFERENCE_ZOOM_LEVEL`], so the level is `floor(20 + log2(scale))`.
/// Non-positive or non-finite scales map to level 0.
pub fn zoom_level(zoom_scale: f64) -> u32 {
    if !(zoom_scale.is_finite() && zoom_scale > 0.0) {
        return 0;
    }
    let level = REFERENCE_ZOOM_LEVEL as f64 + zoom_scale.log2();
    (level + ZOOM_EPSILON)
        .floor()
        .clamp(0.0, MAX_TILE_ZOOM as f64) as u32
}

/// The zoom scale at which a zoom level is displayed pixel-for-pixel.
pub fn zoom_scale(zoom_level: u32) -> f64 {
    2f64.powi(zoom_level as i32 - REFERENCE_ZOOM_LEVEL as i32)
}

/// Number of tiles across the world at a zoom level (`2^zoom_level`).
pub fn world_tile_width(zoom_level: u32) -> u32 {
    1u32 << zoom_level.min(MAX_TILE_ZOOM)
}

/// Width of one tile in map points at a zoom level.
pub fn tile_span(zoom_level: u32) -> f64 {
    MAP_WORLD_SIZE / world_tile_width(zoom_level) as f64
}

/// Top-left corner of a rect in normalized mercator space.
///
/// x wraps around the antimeridian; y is clamped to the world.
pub fn mercator_tile_origin(rect: &MapRect) -> MercatorPoint {
    MercatorPoint {
        x: (rect.origin.x / MAP_WORLD_SIZE).rem_euclid(1.0),
        y: (rect.origin.y / MAP_WORLD_SIZE).clamp(0.0, 1.0),
    }
}

/// The tile whose frame contains the origin of `rect` at `zoom_level`.
pub fn tile_coordinate(rect: &MapRect, zoom_level: u32) -> TileCoordinate {
    let z = zoom_level.min(MAX_TILE_ZOOM);
    let width = world_tile_width(z);
    let origin = mercator_tile_origin(rect);

    let x = ((origin.x * width as f64).floor() as u32).min(width - 1);
    let y = ((origin.y * width as f64).floor() as u32).min(width - 1);

    TileCoordinate::new(x, y, z)
}

/// The map rect covered by a tile. Inverse of [`tile_coordinate`].
pub fn map_rect(coordinate: TileCoordinate) -> MapRect {
    let span = tile_span(coordinate.z);
    MapRect::new(
        coordinate.x as f64 * span,
        coordinate.y as f64 * span,
        span,
        span,
    )
}

/// Tile index bounds of a rect at one zoom level, before wrapping.
struct TileRange {
    min_tx: i64,
    max_tx: i64,
    min_ty: i64,
    max_ty: i64,
    z: u32,
    width: i64,
}

fn covering_range(rect: &MapRect, zoom_level: u32) -> Option<TileRange> {
    if rect.is_empty() {
        return None;
    }

    let z = zoom_level.min(MAX_TILE_ZOOM);
    let width = world_tile_width(z) as i64;
    let span = tile_span(z);

    let min_tx = (rect.min_x() / span).floor() as i64;
    let max_tx = ((rect.max_x() / span).ceil() as i64 - 1).min(min_tx + width - 1);
    let min_ty = ((rect.min_y() / span).floor() as i64).max(0);
    let max_ty = ((rect.max_y() / span).ceil() as i64 - 1).min(width - 1);

    Some(TileRange {
        min_tx,
        max_tx,
        min_ty,
        max_ty,
        z,
        width,
    })
}

/// Number of tiles [`tiles_covering`] returns, without collecting them.
pub fn covering_tile_count(rect: &MapRect, zoom_level: u32) -> u64 {
    match covering_range(rect, zoom_level) {
        Some(range) => {
            let columns = (range.max_tx - range.min_tx + 1).max(0) as u64;
            let rows = (range.max_ty - range.min_ty + 1).max(0) as u64;
            columns.saturating_mul(rows)
        }
        None => 0,
    }
}

/// Every tile at `zoom_level` that intersects `rect`, in row-major order.
///
/// Columns wrap around the antimeridian and never repeat; rows outside the
/// world are dropped. An empty rect covers no tiles.
///
/// The result grows with the square of `2^zoom_level`; check
/// [`covering_tile_count`] first when the rect comes from user input.
pub fn tiles_covering(rect: &MapRect, zoom_level: u32) -> Vec<TileCoordinate> {
    let Some(range) = covering_range(rect, zoom_level) else {
        return Vec::new();
    };

    let mut coordinates = Vec::new();
    for ty in range.min_ty..=range.max_ty {
        for tx in range.min_tx..=range.max_tx {
            let x = tx.rem_euclid(range.width) as u32;
            coordinates.push(TileCoordinate::new(x, ty as u32, range.z));
        }
    }
    coordinates
}
