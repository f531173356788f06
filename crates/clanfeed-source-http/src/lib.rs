// # HTTP Snapshot Source
//
// Fetches the current state of a tracked entity for the digest schedulers.
//
// ## Protocol
//
// GET `{base_url}/{collection}/{entity_tag}` with an optional bearer token,
// where `collection` is the log family's collection name and the tag is
// percent-encoded (`#2PP` → `%232PP`).
//
// - 200: JSON body becomes the feed payload
// - 404: entity unknown, nothing to post this tick
// - anything else: fetch error, the scheduler skips the log
//
// ## Architecture
//
// Single-shot like the transports: one request per `fetch`, no polling,
// no caching, no retries. The scheduler owns timing.

use async_trait::async_trait;
use clanfeed_core::config::SourceConfig;
use clanfeed_core::model::{Feed, LogConfig};
use clanfeed_core::traits::{SnapshotSource, SnapshotSourceFactory};
use clanfeed_core::{Error, FamilyRegistry, Result};
use std::sync::Arc;
use std::time::Duration;

/// HTTP snapshot source
///
/// # Security
///
/// The Debug implementation intentionally does NOT expose the bearer token.
pub struct HttpSnapshotSource {
    base_url: reqwest::Url,
    /// ⚠️ NEVER log this value
    token: Option<String>,
    families: Arc<FamilyRegistry>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpSnapshotSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSnapshotSource")
            .field("base_url", &self.base_url.as_str())
            .field("token", &self.token.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

impl HttpSnapshotSource {
    /// Create a new HTTP snapshot source
    ///
    /// # Parameters
    ///
    /// - `base_url`: Service root, e.g. `https://stats.example/v1`
    /// - `token`: Optional bearer token
    /// - `families`: Used to resolve each log's collection name
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
        families: Arc<FamilyRegistry>,
    ) -> Result<Self> {
        let base_url = reqwest::Url::parse(base_url)
            .map_err(|e| Error::config(format!("Invalid snapshot source URL: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::config("Snapshot source URL cannot be a base URL"));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            token: token.filter(|t| !t.is_empty()),
            families,
            client,
        })
    }

    /// URL of the snapshot for one log
    pub fn snapshot_url(&self, log: &LogConfig) -> Result<reqwest::Url> {
        let collection = self.families.get(log.log_type)?.collection_name();

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::config("Snapshot source URL cannot be a base URL"))?
            .pop_if_empty()
            .push(collection)
            .push(&log.entity_tag);
        Ok(url)
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn fetch(&self, log: &LogConfig) -> Result<Option<Feed>> {
        let url = self.snapshot_url(log)?;

        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::http(format!("Snapshot request failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            tracing::debug!(log_id = %log.id, tag = %log.entity_tag, "No snapshot for entity");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Error::http(format!(
                "Snapshot request for {} returned {}",
                log.entity_tag, status
            )));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::source(format!("Invalid snapshot body: {}", e)))?;

        if payload.is_null() {
            return Ok(None);
        }

        Ok(Some(Feed::new(log.log_type, &log.entity_tag, payload)))
    }

    fn source_name(&self) -> &'static str {
        "http"
    }
}

/// Factory for creating HTTP snapshot sources
pub struct HttpSourceFactory {
    families: Arc<FamilyRegistry>,
}

impl HttpSourceFactory {
    pub fn new(families: Arc<FamilyRegistry>) -> Self {
        Self { families }
    }
}

impl SnapshotSourceFactory for HttpSourceFactory {
    fn create(&self, config: &SourceConfig) -> Result<Box<dyn SnapshotSource>> {
        config.validate()?;
        match config {
            SourceConfig::Http {
                base_url,
                token,
                timeout_secs,
            } => Ok(Box::new(HttpSnapshotSource::new(
                base_url,
                token.clone(),
                Duration::from_secs(*timeout_secs),
                Arc::clone(&self.families),
            )?)),
        }
    }
}
