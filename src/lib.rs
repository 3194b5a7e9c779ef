//! # Tile Animator
//!
//! Animated overlays of time-sequenced map tiles, such as weather radar frames.
//!
//! For N frames, each given as a tile URL template, this library fetches and
//! caches every frame of every tile covering a map region and cycles through
//! them while the caller pans, zooms and scrubs.
//!
//! ## Features
//!
//! - **Tile math**: conversions between map rects, zoom scales and `z/x/y` tile coordinates
//! - **Per-frame tile cache**: one entry per tile coordinate holding every frame's image
//! - **Deduplicated fetching**: concurrent requests for the same tile frame share one fetch
//! - **Cancellation**: outstanding loads can be cancelled or superseded at any time
//! - **Playback control**: Stopped, Loading, Animating and Scrubbing states with a frame timer
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`coord`] - Map space, lat/lng projection and tile coordinate math
//! - [`tile`] - Cached tiles, per-frame slots and image decoding
//! - [`fetch`] - URL templates, the tile source seam and the fetch pipeline
//! - [`animation`] - The overlay and its playback state machine
//! - [`manifest`] - Frame lists from a `{timestamp}` template manifest
//! - [`config`] - Overlay, session and CLI configuration
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tile_animator::{AnimationOverlay, LatLng, MapRect, OverlayConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = OverlayConfig::new(
//!         [
//!             "https://radar.example.com/1200/{z}/{x}/{y}.png",
//!             "https://radar.example.com/1210/{z}/{x}/{y}.png",
//!             "https://radar.example.com/1220/{z}/{x}/{y}.png",
//!         ],
//!         Duration::from_millis(500),
//!     );
//!     let mut overlay = AnimationOverlay::new(config)?;
//!
//!     let region = MapRect::from_region(LatLng::new(40.0, -100.0), 20.0, 30.0);
//!     overlay.fetch_tiles_for_map_rect(region, 4, |frame| println!("frame {} ready", frame), |_| {})?;
//!     overlay.wait_for_load().await;
//!
//!     overlay.start_animating()?;
//!     overlay
//!         .run_until(tokio::time::Instant::now() + Duration::from_secs(3))
//!         .await;
//!     Ok(())
//! }
//! ```

pub mod animation;
pub mod config;
pub mod coord;
pub mod error;
pub mod fetch;
pub mod manifest;
pub mod tile;

// Re-export commonly used types
pub use animation::{
    AnimationDelegate, AnimationOverlay, AnimationState, FrameFailure, LoadOutcome, OverlayEvent,
    TileServingMode,
};
pub use config::{OverlayConfig, SessionConfig};
pub use coord::{
    covering_tile_count, map_rect, tile_coordinate, tiles_covering, zoom_level, zoom_scale,
    LatLng, MapPoint, MapRect, MapSize, TileCoordinate,
};
pub use error::{FetchError, ManifestError, OverlayError};
pub use fetch::{FetchPipeline, HttpTileSource, TileSource, UrlTemplate};
pub use manifest::FrameManifest;
pub use tile::{FrameSlot, SlotState, Tile, TileCache, TileImage};
