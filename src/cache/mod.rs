//! Tiered Content Cache
//!
//! Memory, disk and origin tiers behind a single façade.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                          TieredCache (façade)                            │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  Memory Tier          │ Disk Tier               │ Origin                 │
//! │  ┌────────────────┐   │ ┌────────────────────┐  │ ┌──────────────────┐   │
//! │  │ DashMap        │   │ │ Blob files         │  │ │ OriginFetcher    │   │
//! │  │ decoded values │   │ │ + JSON metadata    │  │ │ (HTTP, ...)      │   │
//! │  │ unbounded      │   │ │ LRU, byte budget   │  │ │                  │   │
//! │  └────────────────┘   │ └────────────────────┘  │ └──────────────────┘   │
//! │         │             │           │             │          │             │
//! │         └─────────────┴───────────┴─────────────┴──────────┘             │
//! │                                   │                                      │
//! │                  InFlightRegistry (one fetch per key)                    │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A lookup walks memory → disk → origin and populates every faster tier on
//! the way back. Concurrent lookups for the same identifier share one
//! resolution.
//!
//! # Failure Model
//!
//! Nothing on the lookup path fails loudly. Disk errors are logged and become
//! misses, origin errors resolve to the configured default value.

mod codec;
mod disk;
mod entry;
mod inflight;
mod key;
mod manager;
mod memory;
mod metadata;
mod metrics;
mod origin;
mod policy;

pub use codec::{BlobCodec, JsonCodec, RawCodec};
pub use disk::{DiskCache, DiskConfig, DiskStats};
pub use entry::{CacheEntry, MetadataDocument};
pub use inflight::{InFlightGuard, InFlightRegistry};
pub use key::CacheKey;
pub use manager::{CacheConfig, CacheTier, Fetched, TieredCache};
pub use memory::MemoryCache;
pub use metadata::MetadataStore;
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use origin::{HttpOrigin, HttpOriginConfig, InMemoryOrigin, OriginFetcher};
pub use policy::{EvictionPolicy, RetryPolicy};

/// Bytes per MiB
pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// Default disk budget (500MB)
pub const DEFAULT_BUDGET_BYTES: u64 = 500 * BYTES_PER_MB;

/// Extra space reclaimed on eviction so the next write does not evict again (1MB)
pub const DEFAULT_EVICTION_BUFFER_BYTES: u64 = BYTES_PER_MB;

/// Default number of attempts for disk writes
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default linear backoff step between write attempts (milliseconds)
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 100;

/// Default cache directory name
pub const DEFAULT_CACHE_DIR_NAME: &str = "image-cache";

/// Name of the metadata file inside the cache directory
pub const METADATA_FILE_NAME: &str = "cache_metadata.json";

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_budget() {
        assert_eq!(DEFAULT_BUDGET_BYTES, 500 * 1024 * 1024);
        assert!(DEFAULT_EVICTION_BUFFER_BYTES < DEFAULT_BUDGET_BYTES);
    }

    #[test]
    fn test_metadata_file_is_json() {
        assert!(METADATA_FILE_NAME.ends_with(".json"));
    }
}
