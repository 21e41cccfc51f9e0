//! Origin Fetchers
//!
//! The slowest tier: wherever the content really lives. The cache only needs
//! "give me the bytes for this identifier"; timeouts and protocol details
//! belong to the fetcher.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{Error, Result};

/// Origin fetcher trait
#[async_trait]
pub trait OriginFetcher: Send + Sync {
    /// Fetch the payload for `identifier`
    async fn fetch(&self, identifier: &str) -> Result<Bytes>;
}

// =============================================================================
// HTTP Origin
// =============================================================================

/// HTTP origin configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpOriginConfig {
    /// Whole-request timeout in seconds
    pub timeout_secs: u64,
    /// User-Agent header
    pub user_agent: String,
}

impl Default for HttpOriginConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: format!("tiercache/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Fetches identifiers as URLs over HTTP(S)
pub struct HttpOrigin {
    client: Client,
}

impl HttpOrigin {
    /// Create a new HTTP origin
    pub fn new(config: &HttpOriginConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl OriginFetcher for HttpOrigin {
    #[instrument(skip(self))]
    async fn fetch(&self, identifier: &str) -> Result<Bytes> {
        let response = self
            .client
            .get(identifier)
            .send()
            .await
            .map_err(Error::OriginConnection)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::OriginStatus {
                identifier: identifier.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(Error::OriginConnection)?;
        debug!(size = body.len(), "Fetched from origin");
        Ok(body)
    }
}

// =============================================================================
// In-Memory Origin
// =============================================================================

/// In-memory origin for tests and embedding
///
/// Uses DashMap for lock-free concurrent access. Counts every fetch so
/// callers can assert how often the origin was hit.
pub struct InMemoryOrigin {
    /// identifier -> payload
    payloads: DashMap<String, Bytes>,
    /// Simulated latency per fetch
    latency: Duration,
    /// Fetch count
    fetches: AtomicU64,
}

impl Default for InMemoryOrigin {
    fn default() -> Self {
        Self {
            payloads: DashMap::new(),
            latency: Duration::ZERO,
            fetches: AtomicU64::new(0),
        }
    }
}

impl InMemoryOrigin {
    /// Create an empty origin
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an origin that sleeps before every fetch
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Add or replace a payload
    pub fn insert(&self, identifier: impl Into<String>, payload: impl Into<Bytes>) {
        self.payloads.insert(identifier.into(), payload.into());
    }

    /// Remove a payload
    pub fn remove(&self, identifier: &str) -> bool {
        self.payloads.remove(identifier).is_some()
    }

    /// Number of fetches served or refused so far
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl OriginFetcher for InMemoryOrigin {
    async fn fetch(&self, identifier: &str) -> Result<Bytes> {
        self.fetches.fetch_add(1, Ordering::Relaxed);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        self.payloads
            .get(identifier)
            .map(|payload| payload.clone())
            .ok_or_else(|| Error::OriginNotFound(identifier.to_string()))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_in_memory_origin_fetch() {
        let origin = InMemoryOrigin::new();
        origin.insert("https://cdn.example/a.png", Bytes::from_static(b"a"));

        let body = origin.fetch("https://cdn.example/a.png").await.unwrap();
        assert_eq!(body, Bytes::from_static(b"a"));
        assert_eq!(origin.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_in_memory_origin_miss() {
        let origin = InMemoryOrigin::new();
        let err = origin.fetch("https://cdn.example/none.png").await.unwrap_err();
        assert_matches!(err, Error::OriginNotFound(_));
        assert_eq!(origin.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_in_memory_origin_remove() {
        let origin = InMemoryOrigin::new();
        origin.insert("a", "payload");
        assert!(origin.remove("a"));
        assert!(!origin.remove("a"));
        assert!(origin.fetch("a").await.is_err());
    }

    #[test]
    fn test_http_origin_config_default() {
        let config = HttpOriginConfig::default();
        assert_eq!(config.timeout_secs, 30);
        assert!(config.user_agent.starts_with("tiercache/"));
        assert!(HttpOrigin::new(&config).is_ok());
    }

    #[tokio::test]
    async fn test_http_origin_invalid_url() {
        let origin = HttpOrigin::new(&HttpOriginConfig::default()).unwrap();
        let err = origin.fetch("not a url").await.unwrap_err();
        assert_matches!(err, Error::OriginConnection(_));
    }
}
