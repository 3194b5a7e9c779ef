//! Per-frame tile URL templates.
//!
//! A template is a URL with `{x}`, `{y}` and `{z}` placeholders, for example
//! `https://radar.example.com/2024-06-01T12:00/{z}/{x}/{y}.png`. Each animation
//! frame has its own template; expanding it with a tile coordinate gives the
//! URL of that tile's image for that frame.

use std::fmt;
use std::str::FromStr;

use crate::coord::TileCoordinate;

const X_PLACEHOLDER: &str = "{x}";
const Y_PLACEHOLDER: &str = "{y}";
const Z_PLACEHOLDER: &str = "{z}";

/// A tile URL template for one animation frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UrlTemplate(String);

impl UrlTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Substitute the tile's x, y and z into the template.
    pub fn expand(&self, coordinate: TileCoordinate) -> String {
        self.0
            .replace(X_PLACEHOLDER, &coordinate.x.to_string())
            .replace(Y_PLACEHOLDER, &coordinate.y.to_string())
            .replace(Z_PLACEHOLDER, &coordinate.z.to_string())
    }

    /// Whether all three placeholders are present.
    ///
    /// A template without them still works but fetches the same image for every tile.
    pub fn has_placeholders(&self) -> bool {
        [X_PLACEHOLDER, Y_PLACEHOLDER, Z_PLACEHOLDER]
            .iter()
            .all(|p| self.0.contains(p))
    }

    /// Check that the template expands to an absolute URL.
    pub fn validate(&self) -> Result<(), String> {
        let sample = self.expand(TileCoordinate::new(0, 0, 0));
        url::Url::parse(&sample)
            .map(|_| ())
            .map_err(|e| format!("template '{}' is not a valid URL: {}", self.0, e))
    }
}

impl fmt::Display for UrlTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UrlTemplate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let template = UrlTemplate::new(s.trim());
        template.validate()?;
        Ok(template)
    }
}

impl From<&str> for UrlTemplate {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for UrlTemplate {
    fn from(s: String) -> Self {
        Self(s)
    }
}
