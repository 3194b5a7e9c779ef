//! Configuration management for Tile Animator.
//!
//! This module provides:
//! - [`OverlayConfig`] and [`SessionConfig`], the library-level configuration
//!   of an animation overlay and of the HTTP session its fetches share
//! - [`Cli`], the command-line interface of the `tile-animator` binary,
//!   with every option also readable from a `TILEANIM_` environment variable
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use tile_animator::config::{OverlayConfig, SessionConfig};
//!
//! let config = OverlayConfig::new(
//!     [
//!         "https://radar.example.com/1200/{z}/{x}/{y}.png",
//!         "https://radar.example.com/1210/{z}/{x}/{y}.png",
//!     ],
//!     Duration::from_millis(250),
//! )
//! .with_zoom_range(2, 10)
//! .with_session(SessionConfig::default().with_header("X-Api-Key", "secret"));
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.frame_count(), 2);
//! ```
//!
//! # Environment Variables
//!
//! - `TILEANIM_TEMPLATE_URLS` - Comma-separated per-frame template URLs
//! - `TILEANIM_MANIFEST` - Frame manifest path or URL (alternative to template URLs)
//! - `TILEANIM_FRAME_STRIDE` - Keep every n-th manifest frame (default: 1)
//! - `TILEANIM_FRAME_DURATION_MS` - Frame duration in milliseconds (default: 500)
//! - `TILEANIM_MIN_ZOOM` / `TILEANIM_MAX_ZOOM` - Supported zoom range (default: 3..=9)
//! - `TILEANIM_TILE_SIZE` - Tile edge length in pixels (default: 256)
//! - `TILEANIM_HEADERS` - Semicolon-separated `Name: value` request headers
//! - `TILEANIM_TIMEOUT_SECS` - Per-request timeout (default: 30)
//! - `TILEANIM_CONCURRENCY` - Maximum concurrent frame fetches (default: 8)
//! - `TILEANIM_MAX_TILES` - Maximum tiles a region may cover (default: 1024)
//! - `TILEANIM_CENTER` - Region center as `lat,lng`
//! - `TILEANIM_LAT_SPAN` / `TILEANIM_LNG_SPAN` - Region span in degrees (default: 10)
//! - `TILEANIM_ZOOM` - Zoom level to fetch

use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::coord::{covering_tile_count, LatLng, MapRect, MAX_TILE_ZOOM};
use crate::error::OverlayError;
use crate::fetch::{UrlTemplate, DEFAULT_MAX_CONCURRENT_FETCHES};
use crate::tile::DEFAULT_TILE_SIZE;

// =============================================================================
// Default Values
// =============================================================================

/// Default time each frame is shown while animating.
pub const DEFAULT_FRAME_DURATION: Duration = Duration::from_millis(500);

/// Default lowest zoom level tiles are fetched for.
pub const DEFAULT_MINIMUM_Z: u32 = 3;

/// Default highest zoom level tiles are fetched for.
pub const DEFAULT_MAXIMUM_Z: u32 = 9;

/// Default cap on the number of tiles one region may cover.
pub const DEFAULT_MAX_VISIBLE_TILES: usize = 1024;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default User-Agent sent with every fetch.
pub const DEFAULT_USER_AGENT: &str = concat!("tile-animator/", env!("CARGO_PKG_VERSION"));

// =============================================================================
// Library Configuration
// =============================================================================

/// Network session settings applied uniformly to every frame fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Extra request headers, e.g. an API key
    pub headers: Vec<(String, String)>,

    /// Whole-request timeout
    pub timeout: Duration,

    pub user_agent: String,
}

impl SessionConfig {
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Configuration of an animation overlay.
///
/// The frame count is the number of template URLs and never changes for the
/// lifetime of an overlay.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayConfig {
    /// One tile URL template per frame, in frame order
    pub template_urls: Vec<UrlTemplate>,

    /// Time each frame is shown while animating
    pub frame_duration: Duration,

    /// Lowest zoom level tiles are fetched for
    pub minimum_z: u32,

    /// Highest zoom level tiles are fetched for
    pub maximum_z: u32,

    /// Tile edge length in pixels
    pub tile_size: u32,

    pub session: SessionConfig,

    /// Maximum number of frame fetches on the network at once
    pub max_concurrent_fetches: usize,

    /// Maximum number of tiles a single fetch may cover
    pub max_visible_tiles: usize,
}

impl OverlayConfig {
    /// Create a configuration with default zoom range, tile size and session.
    pub fn new<I, T>(template_urls: I, frame_duration: Duration) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<UrlTemplate>,
    {
        Self {
            template_urls: template_urls.into_iter().map(Into::into).collect(),
            frame_duration,
            minimum_z: DEFAULT_MINIMUM_Z,
            maximum_z: DEFAULT_MAXIMUM_Z,
            tile_size: DEFAULT_TILE_SIZE,
            session: SessionConfig::default(),
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            max_visible_tiles: DEFAULT_MAX_VISIBLE_TILES,
        }
    }

    pub fn with_zoom_range(mut self, minimum_z: u32, maximum_z: u32) -> Self {
        self.minimum_z = minimum_z;
        self.maximum_z = maximum_z;
        self
    }

    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size;
        self
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn with_max_concurrent_fetches(mut self, max: usize) -> Self {
        self.max_concurrent_fetches = max;
        self
    }

    pub fn with_max_visible_tiles(mut self, max: usize) -> Self {
        self.max_visible_tiles = max;
        self
    }

    pub fn frame_count(&self) -> usize {
        self.template_urls.len()
    }

    /// Reject zoom levels outside `minimum_z..=maximum_z`.
    pub fn check_zoom_level(&self, zoom_level: u32) -> Result<(), OverlayError> {
        if zoom_level < self.minimum_z || zoom_level > self.maximum_z {
            return Err(OverlayError::InvalidZoomLevel {
                zoom: zoom_level,
                minimum: self.minimum_z,
                maximum: self.maximum_z,
            });
        }
        Ok(())
    }

    /// Check that a region can be fetched at `zoom_level`: the zoom level is
    /// supported and the region covers at most `max_visible_tiles` tiles.
    ///
    /// Returns the number of covering tiles.
    pub fn check_region(&self, rect: &MapRect, zoom_level: u32) -> Result<u64, OverlayError> {
        self.check_zoom_level(zoom_level)?;
        let count = covering_tile_count(rect, zoom_level);
        if count > self.max_visible_tiles as u64 {
            return Err(OverlayError::TooManyTiles {
                count,
                limit: self.max_visible_tiles,
            });
        }
        Ok(count)
    }

    /// Validate the configuration.
    ///
    /// Zero template URLs is [`OverlayError::NoFrames`]; every other problem
    /// is [`OverlayError::InvalidConfig`].
    pub fn validate(&self) -> Result<(), OverlayError> {
        if self.template_urls.is_empty() {
            return Err(OverlayError::NoFrames);
        }

        for template in &self.template_urls {
            template.validate().map_err(OverlayError::InvalidConfig)?;
        }

        if self.frame_duration.is_zero() {
            return Err(OverlayError::InvalidConfig(
                "frame_duration must be greater than 0".to_string(),
            ));
        }

        if self.minimum_z > self.maximum_z {
            return Err(OverlayError::InvalidConfig(format!(
                "minimum_z ({}) must not exceed maximum_z ({})",
                self.minimum_z, self.maximum_z
            )));
        }
        if self.maximum_z > MAX_TILE_ZOOM {
            return Err(OverlayError::InvalidConfig(format!(
                "maximum_z must be at most {}",
                MAX_TILE_ZOOM
            )));
        }

        if self.tile_size == 0 {
            return Err(OverlayError::InvalidConfig(
                "tile_size must be greater than 0".to_string(),
            ));
        }

        if self.max_concurrent_fetches == 0 {
            return Err(OverlayError::InvalidConfig(
                "max_concurrent_fetches must be greater than 0".to_string(),
            ));
        }

        if self.max_visible_tiles == 0 {
            return Err(OverlayError::InvalidConfig(
                "max_visible_tiles must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// Tile Animator - animate time-sequenced map tiles.
///
/// Fetches every frame of every tile covering a region and cycles through
/// them, or lists the tiles and frame URLs a region would need.
#[derive(Parser, Debug)]
#[command(name = "tile-animator")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch a region and animate its frames
    Play(PlayConfig),

    /// Print the tiles and frame URLs covering a region
    Tiles(TilesConfig),
}

/// Where frames come from and how they are fetched.
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Per-frame tile URL template with {x}, {y} and {z} placeholders (repeatable).
    #[arg(
        long = "template-url",
        env = "TILEANIM_TEMPLATE_URLS",
        value_delimiter = ','
    )]
    pub template_urls: Vec<String>,

    /// Frame manifest JSON, as a file path or an http(s) URL.
    #[arg(long, env = "TILEANIM_MANIFEST", conflicts_with = "template_urls")]
    pub manifest: Option<String>,

    /// Keep every n-th frame of the manifest.
    #[arg(long, default_value_t = 1, env = "TILEANIM_FRAME_STRIDE")]
    pub frame_stride: usize,

    /// Time each frame is shown, in milliseconds.
    #[arg(long, default_value_t = 500, env = "TILEANIM_FRAME_DURATION_MS")]
    pub frame_duration_ms: u64,

    /// Lowest supported zoom level.
    #[arg(long, default_value_t = DEFAULT_MINIMUM_Z, env = "TILEANIM_MIN_ZOOM")]
    pub min_zoom: u32,

    /// Highest supported zoom level.
    #[arg(long, default_value_t = DEFAULT_MAXIMUM_Z, env = "TILEANIM_MAX_ZOOM")]
    pub max_zoom: u32,

    /// Tile edge length in pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE, env = "TILEANIM_TILE_SIZE")]
    pub tile_size: u32,

    /// Extra request header as "Name: value" (repeatable).
    #[arg(
        long = "header",
        env = "TILEANIM_HEADERS",
        value_delimiter = ';',
        value_parser = parse_header
    )]
    pub headers: Vec<(String, String)>,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 30, env = "TILEANIM_TIMEOUT_SECS")]
    pub timeout_secs: u64,

    /// Maximum number of concurrent frame fetches.
    #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENT_FETCHES, env = "TILEANIM_CONCURRENCY")]
    pub concurrency: usize,

    /// Maximum number of tiles a region may cover.
    #[arg(
        long = "max-tiles",
        default_value_t = DEFAULT_MAX_VISIBLE_TILES,
        env = "TILEANIM_MAX_TILES"
    )]
    pub max_tiles: usize,
}

impl SourceArgs {
    /// Validate the source arguments and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.template_urls.is_empty() && self.manifest.is_none() {
            return Err(
                "No frames configured. Set --template-url or --manifest \
                 (TILEANIM_TEMPLATE_URLS / TILEANIM_MANIFEST)"
                    .to_string(),
            );
        }
        if self.frame_stride == 0 {
            return Err("frame_stride must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            headers: self.headers.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    /// Template URLs given directly on the command line.
    pub fn parse_templates(&self) -> Result<Vec<UrlTemplate>, String> {
        self.template_urls.iter().map(|t| t.parse()).collect()
    }

    /// Build the overlay configuration for an already-resolved frame list.
    pub fn overlay_config(&self, template_urls: Vec<UrlTemplate>) -> OverlayConfig {
        OverlayConfig::new(template_urls, Duration::from_millis(self.frame_duration_ms))
            .with_zoom_range(self.min_zoom, self.max_zoom)
            .with_tile_size(self.tile_size)
            .with_session(self.session())
            .with_max_concurrent_fetches(self.concurrency)
            .with_max_visible_tiles(self.max_tiles)
    }
}

/// The map region to work on.
#[derive(Args, Debug, Clone)]
pub struct RegionArgs {
    /// Region center as "lat,lng".
    #[arg(
        long,
        env = "TILEANIM_CENTER",
        value_parser = parse_lat_lng,
        allow_hyphen_values = true
    )]
    pub center: LatLng,

    /// Region height in degrees of latitude.
    #[arg(long, default_value_t = 10.0, env = "TILEANIM_LAT_SPAN")]
    pub lat_span: f64,

    /// Region width in degrees of longitude.
    #[arg(long, default_value_t = 10.0, env = "TILEANIM_LNG_SPAN")]
    pub lng_span: f64,

    /// Zoom level to fetch tiles at.
    #[arg(long, env = "TILEANIM_ZOOM")]
    pub zoom: u32,
}

impl RegionArgs {
    pub fn map_rect(&self) -> MapRect {
        MapRect::from_region(self.center, self.lat_span, self.lng_span)
    }
}

/// Configuration for the `play` command.
#[derive(Args, Debug, Clone)]
pub struct PlayConfig {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub region: RegionArgs,

    /// Number of full animation loops to play after loading.
    #[arg(long, default_value_t = 3, env = "TILEANIM_LOOPS")]
    pub loops: u32,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl PlayConfig {
    /// How long `loops` full passes over `frame_count` frames take, or
    /// `None` if that does not fit in a [`Duration`].
    pub fn play_duration(
        &self,
        frame_duration: Duration,
        frame_count: usize,
    ) -> Option<Duration> {
        let frames = u32::try_from(frame_count).ok()?.checked_mul(self.loops)?;
        frame_duration.checked_mul(frames)
    }
}

/// Configuration for the `tiles` command.
#[derive(Args, Debug, Clone)]
pub struct TilesConfig {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub region: RegionArgs,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

/// Parse a "Name: value" header.
fn parse_header(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once(':')
        .ok_or_else(|| format!("invalid header '{}': expected \"Name: value\"", s))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("invalid header '{}': empty name", s));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Parse a "lat,lng" pair in degrees.
fn parse_lat_lng(s: &str) -> Result<LatLng, String> {
    let (lat, lng) = s
        .split_once(',')
        .ok_or_else(|| format!("invalid coordinate '{}': expected \"lat,lng\"", s))?;
    let lat: f64 = lat
        .trim()
        .parse()
        .map_err(|e| format!("invalid latitude '{}': {}", lat.trim(), e))?;
    let lng: f64 = lng
        .trim()
        .parse()
        .map_err(|e| format!("invalid longitude '{}': {}", lng.trim(), e))?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return Err(format!("coordinate '{}' is out of range", s));
    }
    Ok(LatLng::new(lat, lng))
}

// =============================================================================
// Tests
// =============================================================================
