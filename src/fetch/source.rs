use async_trait::async_trait;
use bytes::Bytes;

use crate::error::FetchError;

/// Trait for fetching tile payloads by URL.
///
/// This is the only network-facing seam of the overlay: the fetch pipeline
/// hands every frame URL to a `TileSource` and decodes whatever bytes come
/// back. Implementations must be thread-safe since fetches run on spawned tasks.
#[async_trait]
pub trait TileSource: Send + Sync {
    /// Fetch the payload at `url`.
    ///
    /// A non-2xx response must be reported as [`FetchError::BadUrlResponse`].
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError>;

    /// Get an identifier for this source (for logging).
    fn identifier(&self) -> &str;
}
