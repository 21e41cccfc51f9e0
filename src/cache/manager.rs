//! Tiered Cache - memory → disk → origin
//!
//! The public façade. A lookup checks the memory tier, then the disk tier,
//! then the origin, and writes whatever it found back into every faster tier.
//!
//! ```text
//!  get_or_fetch(id)
//!       │
//!       ├─ id empty ────────────────────────────────────────────▶ default
//!       │
//!       ├─ another caller owns id ── wait ── memory? disk? ─────▶ value | default
//!       │
//!       ├─ memory hit ──────────────────────────────────────────▶ value
//!       │
//!       └─ spawned owner task
//!             ├─ disk hit ── decode ── memory.put ──────────────▶ value
//!             └─ origin ── decode ── disk.save ── memory.put ───▶ value
//!                  └─ failure ──────────────────────────────────▶ default
//! ```
//!
//! The owner task holds the `InFlightGuard`, so dropping the caller's future
//! neither aborts the disk write nor strands the waiters.

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use super::codec::BlobCodec;
use super::disk::{DiskCache, DiskConfig};
use super::inflight::InFlightRegistry;
use super::key::CacheKey;
use super::memory::MemoryCache;
use super::metrics::{CacheMetrics, MetricsSnapshot};
use super::origin::{HttpOriginConfig, OriginFetcher};
use crate::error::{Error, Result};

/// Tier a value was served from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CacheTier {
    /// Decoded value already in RAM
    Memory,
    /// Blob file in the cache directory
    Disk,
    /// Fetched from the origin during this call
    Origin,
    /// Nothing available; the configured default
    Default,
}

impl std::fmt::Display for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheTier::Memory => write!(f, "memory"),
            CacheTier::Disk => write!(f, "disk"),
            CacheTier::Origin => write!(f, "origin"),
            CacheTier::Default => write!(f, "default"),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Keep decoded values in RAM
    pub memory_enabled: bool,
    /// Keep blobs on disk
    pub disk_enabled: bool,
    /// Disk tier settings
    pub disk: DiskConfig,
    /// HTTP origin settings (used by the binary)
    pub origin: HttpOriginConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_enabled: true,
            disk_enabled: true,
            disk: DiskConfig::default(),
            origin: HttpOriginConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Load and validate a YAML configuration file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: CacheConfig = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the disk tier cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.disk_enabled && self.disk.eviction.budget_bytes == 0 {
            return Err(Error::Config("disk budget must be greater than zero".into()));
        }
        if self.disk_enabled && self.disk.retry.max_retries == 0 {
            return Err(Error::Config("max_retries must be at least 1".into()));
        }
        if self.disk.metadata_file_name.is_empty() {
            return Err(Error::Config("metadata file name must not be empty".into()));
        }
        Ok(())
    }
}

/// A value plus the tier it came from
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<V> {
    /// Resolved value, or the default
    pub value: V,
    /// Tier that answered
    pub source: CacheTier,
}

// =============================================================================
// Tiered Cache
// =============================================================================

struct Inner<C: BlobCodec> {
    memory: Option<MemoryCache<C::Value>>,
    disk: Option<DiskCache>,
    in_flight: InFlightRegistry,
    origin: Arc<dyn OriginFetcher>,
    codec: C,
    default: RwLock<C::Value>,
    metrics: CacheMetrics,
}

/// Memory → disk → origin cache
///
/// Cheap to clone; clones share every tier.
pub struct TieredCache<C: BlobCodec> {
    inner: Arc<Inner<C>>,
}

impl<C: BlobCodec> Clone for TieredCache<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: BlobCodec> TieredCache<C> {
    /// Build the enabled tiers.
    ///
    /// Fails if the configuration is invalid or the cache directory cannot
    /// be created.
    pub async fn open(
        config: CacheConfig,
        codec: C,
        origin: Arc<dyn OriginFetcher>,
        default: C::Value,
    ) -> Result<Self> {
        config.validate()?;

        let memory = config.memory_enabled.then(MemoryCache::new);
        let disk = if config.disk_enabled {
            Some(DiskCache::open(config.disk.clone()).await?)
        } else {
            None
        };

        info!(
            memory = config.memory_enabled,
            disk = config.disk_enabled,
            codec = codec.name(),
            "Tiered cache ready"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                memory,
                disk,
                in_flight: InFlightRegistry::new(),
                origin,
                codec,
                default: RwLock::new(default),
                metrics: CacheMetrics::new(),
            }),
        })
    }

    /// Resolve `source_id` through the tiers. Never fails; the default is
    /// returned when nothing better is available.
    pub async fn get_or_fetch(&self, source_id: &str) -> C::Value {
        self.get_or_fetch_with_source(source_id).await.value
    }

    /// Like `get_or_fetch`, also reporting which tier answered
    #[instrument(skip(self))]
    pub async fn get_or_fetch_with_source(&self, source_id: &str) -> Fetched<C::Value> {
        let inner = &self.inner;
        inner.metrics.record_request();

        if source_id.is_empty() {
            return inner.fallback();
        }

        let key = CacheKey::derive(source_id);

        let Some(guard) = inner.in_flight.begin(&key) else {
            inner.metrics.record_deduplicated_wait();
            debug!(key = %key, "Waiting for in-flight fetch");
            inner.in_flight.await_completion(&key).await;
            return inner.resolve_after_wait(source_id, &key).await;
        };

        if let Some(value) = inner.memory_lookup(&key) {
            inner.in_flight.complete(guard);
            return Fetched {
                value,
                source: CacheTier::Memory,
            };
        }

        let owner = {
            let inner = Arc::clone(&self.inner);
            let source_id = source_id.to_string();
            tokio::spawn(async move {
                let fetched = inner.resolve(&source_id, &key).await;
                inner.in_flight.complete(guard);
                fetched
            })
        };

        match owner.await {
            Ok(fetched) => fetched,
            Err(e) => {
                error!(error = %e, "Cache resolution task failed");
                inner.fallback()
            }
        }
    }

    /// Memory-only check; a value only on disk is not reported
    pub fn is_cached(&self, source_id: &str) -> bool {
        if source_id.is_empty() {
            return false;
        }
        let key = CacheKey::derive(source_id);
        self.inner
            .memory
            .as_ref()
            .is_some_and(|memory| memory.contains(&key))
    }

    /// Memory-only lookup; never blocks
    pub fn get_cached(&self, source_id: &str) -> Option<C::Value> {
        if source_id.is_empty() {
            return None;
        }
        let key = CacheKey::derive(source_id);
        self.inner.memory.as_ref()?.peek(&key)
    }

    /// Memory-only lookup falling back to the default
    pub fn get_cached_or_default(&self, source_id: &str) -> C::Value {
        self.get_cached(source_id)
            .unwrap_or_else(|| self.default_value())
    }

    /// Drop `source_id` from both tiers
    pub async fn remove(&self, source_id: &str) -> bool {
        if source_id.is_empty() {
            return false;
        }

        let key = CacheKey::derive(source_id);
        if let Some(memory) = &self.inner.memory {
            memory.remove(&key);
        }
        match &self.inner.disk {
            Some(disk) => disk.remove(source_id).await,
            None => true,
        }
    }

    /// Empty both tiers
    pub async fn clear_all(&self) -> bool {
        self.clear_memory();
        match &self.inner.disk {
            Some(disk) => disk.clear().await,
            None => true,
        }
    }

    /// Empty the memory tier only
    pub fn clear_memory(&self) {
        if let Some(memory) = &self.inner.memory {
            memory.clear();
        }
    }

    /// Replace the value returned when nothing better is available
    pub fn set_default(&self, value: C::Value) {
        *self.inner.default.write() = value;
    }

    /// Value served when nothing better is available
    pub fn default_value(&self) -> C::Value {
        self.inner.default.read().clone()
    }

    /// Bytes of blob files on disk (0 with the disk tier disabled)
    pub async fn current_disk_usage_bytes(&self) -> u64 {
        match &self.inner.disk {
            Some(disk) => disk.current_size_bytes().await,
            None => 0,
        }
    }

    /// Entries tracked by the disk tier (0 with the disk tier disabled)
    pub fn entry_count(&self) -> usize {
        self.inner.disk.as_ref().map_or(0, DiskCache::entry_count)
    }

    /// Snapshot of lookup and disk counters
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner
            .metrics
            .snapshot(self.inner.disk.as_ref().map(DiskCache::stats))
    }

    /// Wait for background metadata saves
    pub async fn flush(&self) {
        if let Some(disk) = &self.inner.disk {
            disk.flush().await;
        }
    }

    /// Disk tier, if enabled
    pub fn disk(&self) -> Option<&DiskCache> {
        self.inner.disk.as_ref()
    }
}

impl<C: BlobCodec> Inner<C> {
    fn fallback(&self) -> Fetched<C::Value> {
        self.metrics.record_default_served();
        Fetched {
            value: self.default.read().clone(),
            source: CacheTier::Default,
        }
    }

    fn memory_lookup(&self, key: &CacheKey) -> Option<C::Value> {
        let memory = self.memory.as_ref()?;
        match memory.try_get(key) {
            Some(value) => {
                self.metrics.record_memory_hit();
                debug!(key = %key, "Memory hit");
                Some(value)
            }
            None => {
                self.metrics.record_memory_miss();
                None
            }
        }
    }

    fn remember(&self, key: &CacheKey, value: &C::Value) {
        if let Some(memory) = &self.memory {
            memory.put(key.clone(), value.clone());
        }
    }

    /// Disk lookup with decode; a blob that fails to decode is removed
    async fn disk_lookup(&self, source_id: &str, key: &CacheKey) -> Option<C::Value> {
        let disk = self.disk.as_ref()?;

        let Some(bytes) = disk.load(source_id).await else {
            self.metrics.record_disk_miss();
            return None;
        };

        match self.codec.decode(&bytes) {
            Ok(value) => {
                self.metrics.record_disk_hit();
                debug!(key = %key, "Disk hit");
                self.remember(key, &value);
                Some(value)
            }
            Err(e) => {
                self.metrics.record_disk_decode_failure();
                warn!(key = %key, error = %e, "Discarding undecodable disk blob");
                disk.remove(source_id).await;
                None
            }
        }
    }

    /// Runs inside the owner task
    async fn resolve(&self, source_id: &str, key: &CacheKey) -> Fetched<C::Value> {
        if let Some(value) = self.disk_lookup(source_id, key).await {
            return Fetched {
                value,
                source: CacheTier::Disk,
            };
        }

        self.fetch_from_origin(source_id, key).await
    }

    async fn fetch_from_origin(&self, source_id: &str, key: &CacheKey) -> Fetched<C::Value> {
        self.metrics.record_origin_fetch();

        let fetched = self
            .origin
            .fetch(source_id)
            .await
            .and_then(|bytes| self.codec.decode(&bytes));

        let value = match fetched {
            Ok(value) => value,
            Err(e) => {
                self.metrics.record_origin_failure();
                warn!(key = %key, error = %e, "Origin fetch failed, serving default");
                return self.fallback();
            }
        };

        if let Some(disk) = &self.disk {
            match self.codec.encode(&value) {
                Ok(bytes) => {
                    if !disk.save(source_id, &bytes).await {
                        warn!(key = %key, "Fetched value not persisted to disk");
                    }
                }
                Err(e) => warn!(key = %key, error = %e, "Failed to encode fetched value"),
            }
        }
        self.remember(key, &value);

        debug!(key = %key, "Origin fetch complete");
        Fetched {
            value,
            source: CacheTier::Origin,
        }
    }

    /// A waiter never fetches; it reads what the owner left behind
    async fn resolve_after_wait(&self, source_id: &str, key: &CacheKey) -> Fetched<C::Value> {
        if let Some(value) = self.memory_lookup(key) {
            return Fetched {
                value,
                source: CacheTier::Memory,
            };
        }
        if let Some(value) = self.disk_lookup(source_id, key).await {
            return Fetched {
                value,
                source: CacheTier::Disk,
            };
        }
        self.fallback()
    }
}

// =============================================================================
// Tests
// =============================================================================
