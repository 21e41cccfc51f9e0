//! Cache Entry Types
//!
//! One `CacheEntry` per blob on disk, plus the document that wraps the whole
//! table when it is persisted as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::key::CacheKey;

/// Metadata for one cached blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Identifier the key was derived from
    pub source_id: String,
    /// Derived key, also the blob file name
    pub key: CacheKey,
    /// Blob size in bytes
    pub size_bytes: u64,
    /// First write
    pub created_at: DateTime<Utc>,
    /// Most recent read or write
    pub last_accessed_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Create an entry for a blob written just now
    pub fn new(source_id: impl Into<String>, key: CacheKey, size_bytes: u64) -> Self {
        let now = Utc::now();
        Self {
            source_id: source_id.into(),
            key,
            size_bytes,
            created_at: now,
            last_accessed_at: now,
        }
    }

    /// Record an access
    #[inline]
    pub fn touch(&mut self) {
        self.touch_at(Utc::now());
    }

    /// Record an access at a given instant. Never moves before `created_at`.
    pub fn touch_at(&mut self, at: DateTime<Utc>) {
        self.last_accessed_at = at.max(self.created_at);
    }

    /// Replace the blob size after an overwrite, keeping `created_at`
    pub fn rewrite(&mut self, size_bytes: u64) {
        self.size_bytes = size_bytes;
        self.touch();
    }
}

/// Root of the persisted metadata file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataDocument {
    /// All entries, in no particular order
    #[serde(default)]
    pub entries: Vec<CacheEntry>,
}

// =============================================================================
// Tests
// =============================================================================
