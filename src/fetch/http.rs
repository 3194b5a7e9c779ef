use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, trace};

use super::TileSource;
use crate::config::SessionConfig;
use crate::error::{FetchError, OverlayError};

/// How long idle pooled connections are kept around between animation loads.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// HTTP-backed implementation of TileSource.
///
/// One `reqwest::Client` is shared by every frame fetch, so the session's
/// headers, timeout and user agent apply uniformly and connections to the
/// tile server are pooled across tiles and frames.
#[derive(Clone)]
pub struct HttpTileSource {
    client: reqwest::Client,
    identifier: String,
}

impl HttpTileSource {
    /// Build a source from the network session configuration.
    ///
    /// Returns [`OverlayError::InvalidConfig`] if a header name or value is not
    /// valid HTTP, or if the client cannot be constructed.
    pub fn new(session: &SessionConfig) -> Result<Self, OverlayError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &session.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                OverlayError::InvalidConfig(format!("invalid header name '{}': {}", name, e))
            })?;
            let header_value = HeaderValue::from_str(value).map_err(|e| {
                OverlayError::InvalidConfig(format!("invalid value for header '{}': {}", name, e))
            })?;
            headers.insert(header_name, header_value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(session.timeout)
            .user_agent(session.user_agent.as_str())
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .build()
            .map_err(|e| OverlayError::InvalidConfig(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self::with_client(client))
    }

    /// Wrap an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            identifier: "http".to_string(),
        }
    }
}

fn classify(url: &str, error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Transport {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}

#[async_trait]
impl TileSource for HttpTileSource {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        trace!(url = url, "HTTP GET");

        let response = self.client.get(url).send().await.map_err(|e| {
            debug!(url = url, error = %e, is_timeout = e.is_timeout(), "HTTP request failed");
            classify(url, e)
        })?;

        let status = response.status();
        if !status.is_success() {
            debug!(url = url, status = status.as_u16(), "HTTP error status");
            return Err(FetchError::BadUrlResponse {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| classify(url, e))?;
        trace!(url = url, bytes = body.len(), "HTTP response received");
        Ok(body)
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
