//! Metadata Table and Persistence
//!
//! The in-memory table of `CacheEntry` values is authoritative for the
//! session. It is mirrored to a JSON file after mutations; the file is only
//! read back when a store is opened.
//!
//! # Durability
//!
//! - Writers serialize on one process-wide lock, so the file is written by
//!   one task at a time and always reflects the newest snapshot.
//! - Transient write failures are retried with linear backoff. When retries
//!   run out the failure is logged and the table in memory stays correct.
//! - A missing, empty or unparseable file loads as an empty table and a
//!   fresh file is written in its place.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::{debug, error, info};

use super::entry::{CacheEntry, MetadataDocument};
use super::key::CacheKey;
use super::policy::RetryPolicy;
use crate::error::Result;

/// Only one metadata writer at a time across the whole process
static METADATA_WRITE_LOCK: Lazy<tokio::sync::Mutex<()>> =
    Lazy::new(|| tokio::sync::Mutex::new(()));

/// Metadata table plus its on-disk mirror
pub struct MetadataStore {
    /// Path of the JSON file
    path: PathBuf,
    /// Key -> entry
    table: RwLock<HashMap<CacheKey, CacheEntry>>,
    /// Write retry policy
    retry: RetryPolicy,
    /// Retried writes
    write_retries: AtomicU64,
    /// Writes that ran out of retries
    write_failures: AtomicU64,
}

impl MetadataStore {
    /// Load the table from `path`, keeping only entries whose blob file
    /// exists under `blob_dir`.
    ///
    /// Never fails: anything unreadable resets the table to empty and
    /// rewrites the file.
    pub async fn load(path: impl Into<PathBuf>, blob_dir: &Path, retry: RetryPolicy) -> Self {
        let store = Self {
            path: path.into(),
            table: RwLock::new(HashMap::new()),
            retry,
            write_retries: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
        };

        let document = match store.read_document().await {
            Ok(Some(document)) => document,
            Ok(None) => {
                debug!(path = %store.path.display(), "No metadata yet, starting empty");
                store.persist().await;
                return store;
            }
            Err(e) => {
                error!(path = %store.path.display(), error = %e, "Failed to load metadata, resetting");
                store.persist().await;
                return store;
            }
        };

        let total = document.entries.len();
        let mut kept = HashMap::with_capacity(total);
        for entry in document.entries {
            if Self::is_valid(&entry, blob_dir).await {
                kept.insert(entry.key.clone(), entry);
            } else {
                debug!(key = %entry.key, source_id = %entry.source_id, "Dropping entry without blob");
            }
        }

        let pruned = total - kept.len();
        *store.table.write() = kept;

        if pruned > 0 {
            info!(pruned, kept = total - pruned, "Pruned stale metadata entries");
            store.persist().await;
        }

        store
    }

    /// Read and parse the file. `Ok(None)` for a missing or blank file.
    async fn read_document(&self) -> Result<Option<MetadataDocument>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if raw.trim().is_empty() {
            return Ok(None);
        }

        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// An entry survives loading if its key matches its source and the blob
    /// file is still there.
    async fn is_valid(entry: &CacheEntry, blob_dir: &Path) -> bool {
        if !entry.key.is_well_formed() || entry.key != CacheKey::derive(&entry.source_id) {
            return false;
        }
        matches!(
            tokio::fs::metadata(blob_dir.join(entry.key.as_str())).await,
            Ok(meta) if meta.is_file()
        )
    }

    /// Write the current table to disk.
    ///
    /// Returns false when every attempt failed; the failure is logged.
    pub async fn persist(&self) -> bool {
        let _guard = METADATA_WRITE_LOCK.lock().await;

        // Snapshot under the write lock so a slower writer never overwrites
        // a newer table.
        let document = MetadataDocument {
            entries: self.entries(),
        };

        let result = async {
            let json = serde_json::to_vec_pretty(&document)?;
            self.retry
                .run("metadata write", &self.write_retries, || self.write_once(&json))
                .await
        }
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                self.write_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    path = %self.path.display(),
                    attempts = self.retry.max_retries,
                    error = %e,
                    "Failed to save metadata"
                );
                false
            }
        }
    }

    async fn write_once(&self, json: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }

    /// Get a copy of one entry
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.table.read().get(key).cloned()
    }

    /// Check if the table has an entry for `key`
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.table.read().contains_key(key)
    }

    /// Record a write: new entry, or resize + touch of an existing one
    pub fn record_write(&self, source_id: &str, key: &CacheKey, size_bytes: u64) {
        let mut table = self.table.write();
        match table.get_mut(key) {
            Some(entry) => entry.rewrite(size_bytes),
            None => {
                table.insert(key.clone(), CacheEntry::new(source_id, key.clone(), size_bytes));
            }
        }
    }

    /// Record a read. Returns false when the key has no entry.
    pub fn touch(&self, key: &CacheKey) -> bool {
        match self.table.write().get_mut(key) {
            Some(entry) => {
                entry.touch();
                true
            }
            None => false,
        }
    }

    /// Drop one entry
    pub fn remove(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.table.write().remove(key)
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.table.write().clear();
    }

    /// Copy of all entries
    pub fn entries(&self) -> Vec<CacheEntry> {
        self.table.read().values().cloned().collect()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    /// Path of the JSON file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Retried metadata writes
    pub fn write_retries(&self) -> u64 {
        self.write_retries.load(Ordering::Relaxed)
    }

    /// Metadata writes that ran out of retries
    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore")
            .field("path", &self.path)
            .field("entries", &self.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
