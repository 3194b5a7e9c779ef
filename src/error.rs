use thiserror::Error;

/// Errors that can occur while fetching a single frame of a single tile.
///
/// These are recorded on the tile's frame slot and reported to the delegate.
/// They never abort sibling fetches and never change the animation state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The tile server answered with a non-2xx status code
    #[error("Bad URL response: HTTP {status} from {url}")]
    BadUrlResponse { url: String, status: u16 },

    /// The payload was empty or could not be decoded into an image
    #[error("No image data from {url}: {reason}")]
    NoImageData { url: String, reason: String },

    /// Connection or protocol failure below the HTTP status layer
    #[error("Transport error fetching {url}: {message}")]
    Transport { url: String, message: String },

    /// The transport gave up waiting for a response
    #[error("Timed out fetching {url}")]
    Timeout { url: String },
}

impl FetchError {
    /// The URL of the request that failed.
    pub fn url(&self) -> &str {
        match self {
            FetchError::BadUrlResponse { url, .. }
            | FetchError::NoImageData { url, .. }
            | FetchError::Transport { url, .. }
            | FetchError::Timeout { url } => url,
        }
    }
}

/// Structural errors raised synchronously by the overlay.
///
/// Whenever one of these is returned, the overlay's state is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OverlayError {
    /// Requested zoom level is outside the supported range
    #[error("Invalid zoom level {zoom}: supported range is {minimum}..={maximum}")]
    InvalidZoomLevel { zoom: u32, minimum: u32, maximum: u32 },

    /// The region covers more tiles than the overlay is allowed to track
    #[error("Region covers {count} tiles at this zoom level (limit is {limit})")]
    TooManyTiles { count: u64, limit: usize },

    /// The overlay was configured without any template URLs
    #[error("No frames: at least one template URL is required")]
    NoFrames,

    /// Frame index outside `0..frame_count`
    #[error("Frame index {index} out of bounds (frame count is {frame_count})")]
    OutOfBounds { index: usize, frame_count: usize },

    /// Animation was requested before any frame was cached for the current view
    #[error("Nothing to animate: no frame is cached for the current view")]
    NothingToAnimate,

    /// A live tile load finished without producing a terminal frame slot
    #[error("Tile load was cancelled before it completed")]
    LoadCancelled,

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A live tile load failed
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Errors that can occur while reading a frame manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The document is not valid manifest JSON
    #[error("Invalid manifest JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The manifest lists no frame timestamps
    #[error("Manifest contains no timestamps")]
    NoTimestamps,

    /// The manifest template has no `{timestamp}` placeholder
    #[error("Manifest template is missing the {{timestamp}} placeholder")]
    MissingPlaceholder,

    /// The manifest could not be read from disk or downloaded
    #[error("Failed to load manifest: {0}")]
    Load(String),
}
