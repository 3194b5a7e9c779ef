//! Tile layer.
//!
//! This module holds the cached tiles of the overlay and the decoder that
//! turns fetched payloads into frame images.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          Animation Controller           │
//! └────────────────────┬────────────────────┘
//!                      │ lookups (sync)
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │               TileCache                 │
//! │   TileCoordinate ──▶ Tile               │
//! │                      ├ frame 0 slot     │
//! │                      ├ frame 1 slot     │
//! │                      └ ...              │
//! └────────────────────▲────────────────────┘
//!                      │ slot writes (single writer)
//! ┌────────────────────┴────────────────────┐
//! │    Fetch Pipeline  +  TileDecoder       │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TileCache`]: owns every [`Tile`], keyed by coordinate, creates on miss
//! - [`Tile`]: one grid cell with a fixed number of per-frame [`FrameSlot`]s
//! - [`TileDecoder`]: decodes PNG/JPEG payloads into [`TileImage`]s

mod cache;
mod decoder;
mod entry;

pub use cache::TileCache;
pub use decoder::{TileDecoder, DEFAULT_TILE_SIZE};
pub use entry::{FrameSlot, SlotState, Tile, TileImage};
