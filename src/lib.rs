//! tiercache - Tiered Content Cache
//!
//! Resolves remote content (images, documents, any blob addressed by an
//! identifier) through three tiers: decoded values in RAM, raw blobs on a
//! size-bounded local disk, and finally the origin.
//!
//! # Architecture
//!
//! ```text
//! get_or_fetch(id) → Memory → Disk (LRU, byte budget) → Origin
//!                      ▲          ▲                       │
//!                      └──────────┴───── populate ────────┘
//! ```
//!
//! Concurrent requests for the same identifier share a single origin fetch.
//! Failures never reach the caller: a miss everywhere resolves to the
//! configured default value.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use tiercache::cache::{CacheConfig, HttpOrigin, HttpOriginConfig, RawCodec, TieredCache};
//!
//! # async fn run() -> tiercache::Result<()> {
//! let config = CacheConfig::default();
//! let origin = Arc::new(HttpOrigin::new(&config.origin)?);
//! let cache = TieredCache::open(config, RawCodec, origin, Bytes::new()).await?;
//!
//! let image = cache.get_or_fetch("https://cdn.example/cards/025.png").await;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Tiers, keys, metadata persistence and the `TieredCache` façade
//! - [`error`] - Error types

pub mod cache;
pub mod error;

// Re-export commonly used types
pub use cache::{
    BlobCodec, CacheConfig, CacheKey, CacheTier, DiskCache, DiskConfig, Fetched, HttpOrigin,
    InMemoryOrigin, JsonCodec, OriginFetcher, RawCodec, TieredCache,
};
pub use error::{Error, Result};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
