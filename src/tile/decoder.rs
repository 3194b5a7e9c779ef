//! Tile image decoder.
//!
//! Fetched payloads are decoded once, off the owner context, and the decoded
//! image is what the cache stores. The format is sniffed from the payload so
//! PNG and JPEG tile servers both work.
//!
//! # Design Decisions
//!
//! - **Decode eagerly**: the animation reads frames synchronously on every
//!   tick, so decoding is done when the frame arrives rather than when it is drawn.
//!
//! - **No resizing**: tiles are stored at their native size. A tile whose size
//!   differs from the configured tile size is still accepted and logged.

use std::sync::Arc;

use tracing::debug;

use crate::error::FetchError;

use super::entry::TileImage;

/// Default tile edge length in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

// =============================================================================
// Tile Decoder
// =============================================================================

/// Decodes fetched tile payloads into images.
#[derive(Debug, Clone)]
pub struct TileDecoder {
    tile_size: u32,
}

impl TileDecoder {
    /// Create a decoder expecting square tiles of `tile_size` pixels.
    pub fn new(tile_size: u32) -> Self {
        Self { tile_size }
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Decode a payload fetched from `url`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::NoImageData`] if the payload is empty or is not a
    /// decodable image.
    pub fn decode(&self, url: &str, payload: &[u8]) -> Result<TileImage, FetchError> {
        if payload.is_empty() {
            return Err(FetchError::NoImageData {
                url: url.to_string(),
                reason: "empty payload".to_string(),
            });
        }

        let image = image::load_from_memory(payload).map_err(|e| FetchError::NoImageData {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        if image.width() != self.tile_size || image.height() != self.tile_size {
            debug!(
                url = url,
                width = image.width(),
                height = image.height(),
                expected = self.tile_size,
                "Tile image size differs from configured tile size"
            );
        }

        Ok(Arc::new(image))
    }
}

impl Default for TileDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_TILE_SIZE)
    }
}
