//! The transport boundary: config downloads and batch uploads.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use wiretap_config::Config;

/// Timeout applied to config downloads and batch uploads.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Raised for failures at the transport boundary.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// The HTTP request failed or timed out.
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The config endpoint answered with an unexpected status.
    #[error("config endpoint returned status {0}")]
    ConfigStatus(u16),
}

/// Transport used by the engine to talk to the collection backend.
///
/// The engine only needs two operations, so tests can substitute the whole
/// transport with a handful of lines.
#[async_trait]
pub trait ConfigClient: fmt::Debug + Send + Sync {
    /// Downloads the raw ingest config document.
    async fn fetch_ingest_config(&self) -> Result<String, UpstreamError>;

    /// Uploads an encoded batch, returning the response status code.
    async fn post_batch(&self, payload: Vec<u8>) -> Result<u16, UpstreamError>;
}

/// The production transport on top of `reqwest`.
#[derive(Debug)]
pub struct HttpConfigClient {
    client: reqwest::Client,
    config_url: String,
    tracks_url: String,
}

impl HttpConfigClient {
    /// Creates the transport for the endpoints named by the config.
    pub fn new(config: &Config) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            config_url: config.ingest_config_url(),
            tracks_url: config.tracks_url(),
        })
    }
}

#[async_trait]
impl ConfigClient for HttpConfigClient {
    async fn fetch_ingest_config(&self) -> Result<String, UpstreamError> {
        let response = self.client.get(&self.config_url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::ConfigStatus(status.as_u16()));
        }

        Ok(response.text().await?)
    }

    async fn post_batch(&self, payload: Vec<u8>) -> Result<u16, UpstreamError> {
        let response = self
            .client
            .post(&self.tracks_url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .body(payload)
            .send()
            .await?;

        // The response body is ignored. The tracks endpoint answers 204 when
        // the batch parsed correctly; anything else is logged by the caller.
        Ok(response.status().as_u16())
    }
}
