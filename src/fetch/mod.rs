//! Frame fetching.
//!
//! This module turns tile frames into network requests:
//!
//! - [`UrlTemplate`]: per-frame URL template with `{x}`, `{y}`, `{z}` placeholders
//! - [`TileSource`]: async seam for fetching a payload by URL
//! - [`HttpTileSource`]: `reqwest`-backed source honoring the session configuration
//! - [`FetchPipeline`]: deduplicating, cancellable fetch scheduler that writes
//!   results into the [`TileCache`](crate::tile::TileCache)

mod http;
mod pipeline;
mod source;
mod template;

pub use http::HttpTileSource;
pub use pipeline::{
    BatchId, BatchSummary, CancelScope, FetchEvent, FetchPipeline, FrameKey,
    DEFAULT_MAX_CONCURRENT_FETCHES,
};
pub use source::TileSource;
pub use template::UrlTemplate;
