//! Frame manifests.
//!
//! A manifest describes the frames of an animation as one URL template with
//! a `{timestamp}` placeholder plus the list of timestamps, for example:
//!
//! ```json
//! {
//!   "template": "https://radar.example.com/{timestamp}/{z}/{x}/{y}.png",
//!   "timestamps": ["1700000000", "1700000600", 1700001200],
//!   "ingest": "2023-11-14T22:20:00Z"
//! }
//! ```
//!
//! Timestamps may be strings or integers and are substituted verbatim, in
//! order, to produce one [`UrlTemplate`] per frame.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SessionConfig;
use crate::error::ManifestError;
use crate::fetch::{HttpTileSource, TileSource, UrlTemplate};

const TIMESTAMP_PLACEHOLDER: &str = "{timestamp}";

/// One frame timestamp as it appears in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Text(String),
    Number(i64),
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timestamp::Text(s) => f.write_str(s),
            Timestamp::Number(n) => write!(f, "{}", n),
        }
    }
}

/// A list of animation frames sharing one URL template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameManifest {
    /// Tile URL template with a `{timestamp}` placeholder
    pub template: String,

    /// Frame timestamps in display order
    pub timestamps: Vec<Timestamp>,

    /// When the data was produced, informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingest: Option<String>,
}

impl FrameManifest {
    /// Parse and validate a manifest from JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ManifestError> {
        let manifest: FrameManifest = serde_json::from_slice(bytes)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Read a manifest from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| ManifestError::Load(format!("{}: {}", path.display(), e)))?;
        Self::from_slice(&bytes)
    }

    /// Download a manifest using the given session settings.
    pub async fn from_url(url: &str, session: &SessionConfig) -> Result<Self, ManifestError> {
        let source =
            HttpTileSource::new(session).map_err(|e| ManifestError::Load(e.to_string()))?;
        let bytes = source
            .fetch(url)
            .await
            .map_err(|e| ManifestError::Load(e.to_string()))?;
        debug!(url = url, bytes = bytes.len(), "Downloaded frame manifest");
        Self::from_slice(&bytes)
    }

    /// Load from an http(s) URL or, otherwise, a file path.
    pub async fn load(location: &str, session: &SessionConfig) -> Result<Self, ManifestError> {
        if location.starts_with("http://") || location.starts_with("https://") {
            Self::from_url(location, session).await
        } else {
            Self::from_file(location)
        }
    }

    fn validate(&self) -> Result<(), ManifestError> {
        if self.timestamps.is_empty() {
            return Err(ManifestError::NoTimestamps);
        }
        if !self.template.contains(TIMESTAMP_PLACEHOLDER) {
            return Err(ManifestError::MissingPlaceholder);
        }
        Ok(())
    }

    /// Number of frames produced with the given stride.
    pub fn frame_count(&self, stride: usize) -> usize {
        self.timestamps.iter().step_by(stride.max(1)).count()
    }

    /// Per-frame templates, keeping every `stride`-th timestamp starting with the first.
    pub fn template_urls(&self, stride: usize) -> Vec<UrlTemplate> {
        self.timestamps
            .iter()
            .step_by(stride.max(1))
            .map(|ts| self.template.replace(TIMESTAMP_PLACEHOLDER, &ts.to_string()))
            .map(UrlTemplate::new)
            .collect()
    }
}
