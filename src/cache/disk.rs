//! Disk Tier - size-bounded blob storage
//!
//! One file per blob, named by its `CacheKey`, plus a JSON metadata file in
//! the same directory.
//!
//! # Design
//!
//! - Strict LRU eviction under a soft byte budget, run inside `save`
//! - Disk usage is measured from the filesystem, never from a counter, so it
//!   corrects itself if metadata and disk drift apart
//! - Mutations (`save`, `remove`, `clear`) are serialized by a write gate;
//!   reads only touch the metadata table
//! - Every public operation logs and swallows its own failures

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use super::key::CacheKey;
use super::metadata::MetadataStore;
use super::policy::{EvictionPolicy, RetryPolicy};
use super::{BYTES_PER_MB, DEFAULT_CACHE_DIR_NAME, METADATA_FILE_NAME};
use crate::error::Result;

/// Disk tier configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    /// Cache directory path
    pub root_dir: PathBuf,
    /// Budget and eviction buffer
    pub eviction: EvictionPolicy,
    /// Retries for blob and metadata writes
    pub retry: RetryPolicy,
    /// Metadata file name inside `root_dir`
    pub metadata_file_name: String,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from(DEFAULT_CACHE_DIR_NAME),
            eviction: EvictionPolicy::default(),
            retry: RetryPolicy::default(),
            metadata_file_name: METADATA_FILE_NAME.to_string(),
        }
    }
}

impl DiskConfig {
    /// Default configuration rooted at `root_dir`
    pub fn at(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    /// Set the byte budget
    pub fn with_budget(mut self, budget_bytes: u64) -> Self {
        self.eviction.budget_bytes = budget_bytes;
        self
    }
}

/// Disk tier statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiskStats {
    /// Entries in the metadata table
    pub entries: u64,
    /// Reads that found a blob
    pub hits: u64,
    /// Reads that found nothing
    pub misses: u64,
    /// Entries removed to make room
    pub evictions: u64,
    /// Bytes reclaimed by eviction
    pub bytes_evicted: u64,
    /// Retried blob writes
    pub blob_write_retries: u64,
    /// Retried metadata writes
    pub metadata_write_retries: u64,
    /// Metadata writes that ran out of retries
    pub metadata_write_failures: u64,
}

/// Disk tier
pub struct DiskCache {
    /// Configuration
    config: DiskConfig,
    /// Metadata table, shared with background saves
    metadata: Arc<MetadataStore>,
    /// Serializes mutations so eviction and the write it makes room for are atomic
    write_gate: tokio::sync::Mutex<()>,
    /// Outstanding background metadata saves
    background: TaskTracker,
    /// A background save is queued and has not snapshotted yet
    save_queued: Arc<AtomicBool>,
    /// Hit count
    hits: AtomicU64,
    /// Miss count
    misses: AtomicU64,
    /// Eviction count
    evictions: AtomicU64,
    /// Bytes reclaimed by eviction
    bytes_evicted: AtomicU64,
    /// Retried blob writes
    write_retries: AtomicU64,
}

impl DiskCache {
    /// Open the cache directory, creating it if needed, and load metadata.
    ///
    /// Entries whose blob is gone are dropped; an unreadable metadata file is
    /// replaced by an empty one. Fails only if the directory cannot be created.
    #[instrument(skip(config), fields(root = %config.root_dir.display()))]
    pub async fn open(config: DiskConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.root_dir).await?;

        let metadata_path = config.root_dir.join(&config.metadata_file_name);
        let metadata =
            MetadataStore::load(metadata_path, &config.root_dir, config.retry.clone()).await;

        info!(
            entries = metadata.len(),
            budget_bytes = config.eviction.budget_bytes,
            "Disk cache opened"
        );

        Ok(Self {
            config,
            metadata: Arc::new(metadata),
            write_gate: tokio::sync::Mutex::new(()),
            background: TaskTracker::new(),
            save_queued: Arc::new(AtomicBool::new(false)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            bytes_evicted: AtomicU64::new(0),
            write_retries: AtomicU64::new(0),
        })
    }

    /// Store a blob for `source_id`.
    ///
    /// Returns false for an empty identifier or blob, or when the write
    /// failed after retries.
    #[instrument(skip(self, blob), fields(size = blob.len()))]
    pub async fn save(&self, source_id: &str, blob: &[u8]) -> bool {
        if source_id.is_empty() || blob.is_empty() {
            warn!("Rejected save with empty identifier or blob");
            return false;
        }

        match self.try_save(source_id, blob).await {
            Ok(()) => true,
            Err(e) => {
                error!(source_id, error = %e, "Failed to save blob");
                false
            }
        }
    }

    async fn try_save(&self, source_id: &str, blob: &[u8]) -> Result<()> {
        let key = CacheKey::derive(source_id);
        let path = self.blob_path(&key);
        let incoming = blob.len() as u64;

        let _gate = self.write_gate.lock().await;

        self.ensure_space(&key, &path, incoming).await;

        self.config
            .retry
            .run("blob write", &self.write_retries, || {
                Self::write_blob(&self.config.root_dir, &path, blob)
            })
            .await?;

        self.metadata.record_write(source_id, &key, incoming);
        self.metadata.persist().await;

        debug!(key = %key, size = incoming, "Blob saved");
        Ok(())
    }

    async fn write_blob(root: &Path, path: &Path, blob: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(root).await?;
        tokio::fs::write(path, blob).await?;
        Ok(())
    }

    /// Evict until `incoming` bytes fit. Failures here are logged and the
    /// write goes ahead anyway.
    async fn ensure_space(&self, key: &CacheKey, path: &Path, incoming: u64) {
        let current = match self.scan_size().await {
            Ok(size) => size,
            Err(e) => {
                error!(error = %e, "Failed to measure disk usage, skipping eviction");
                return;
            }
        };

        // An overwrite replaces the old blob, so its bytes do not count.
        let replaced = file_len(path).await;
        let deficit = self
            .config
            .eviction
            .deficit(current.saturating_sub(replaced), incoming);

        if deficit > 0 {
            self.evict(deficit, key).await;
        }
    }

    /// Delete least recently accessed entries until `deficit` bytes are
    /// reclaimed or nothing is left. `protect` is the key being written.
    async fn evict(&self, deficit: u64, protect: &CacheKey) -> u64 {
        let entries = self.metadata.entries();
        let candidates = EvictionPolicy::eviction_order(entries.iter().filter(|e| &e.key != protect));

        let mut reclaimed = 0u64;
        let mut evicted = 0u64;
        for entry in candidates {
            if reclaimed >= deficit {
                break;
            }

            let path = self.blob_path(&entry.key);
            let size = file_len(&path).await;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(key = %entry.key, error = %e, "Failed to evict blob");
                    continue;
                }
            }

            self.metadata.remove(&entry.key);
            reclaimed += size;
            evicted += 1;
            debug!(key = %entry.key, size, "Evicted");
        }

        self.evictions.fetch_add(evicted, Ordering::Relaxed);
        self.bytes_evicted.fetch_add(reclaimed, Ordering::Relaxed);
        info!(deficit, reclaimed, evicted, "Eviction finished");
        reclaimed
    }

    /// Read the blob for `source_id`.
    ///
    /// A hit refreshes the entry's access time and schedules a background
    /// metadata save; a failed save does not affect the read.
    #[instrument(skip(self))]
    pub async fn load(&self, source_id: &str) -> Option<Bytes> {
        if source_id.is_empty() {
            return None;
        }

        let key = CacheKey::derive(source_id);
        match tokio::fs::read(self.blob_path(&key)).await {
            Ok(data) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                if self.metadata.touch(&key) {
                    self.schedule_metadata_save();
                }
                debug!(key = %key, size = data.len(), "Disk hit");
                Some(Bytes::from(data))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                error!(key = %key, error = %e, "Failed to read blob");
                None
            }
        }
    }

    /// Queue one background save. Touches that land before it snapshots are
    /// folded into it.
    fn schedule_metadata_save(&self) {
        if self.save_queued.swap(true, Ordering::AcqRel) {
            return;
        }

        let metadata = Arc::clone(&self.metadata);
        let queued = Arc::clone(&self.save_queued);
        self.background.spawn(async move {
            queued.store(false, Ordering::Release);
            if !metadata.persist().await {
                warn!("Background metadata save failed, in-memory table stays authoritative");
            }
        });
    }

    /// True only if the blob file exists and the metadata has an entry
    pub async fn has(&self, source_id: &str) -> bool {
        if source_id.is_empty() {
            return false;
        }

        let key = CacheKey::derive(source_id);
        if !self.metadata.contains(&key) {
            return false;
        }
        matches!(tokio::fs::metadata(self.blob_path(&key)).await, Ok(meta) if meta.is_file())
    }

    /// Delete the blob and its entry. True even if nothing was cached.
    #[instrument(skip(self))]
    pub async fn remove(&self, source_id: &str) -> bool {
        if source_id.is_empty() {
            return false;
        }

        let key = CacheKey::derive(source_id);
        let _gate = self.write_gate.lock().await;

        match tokio::fs::remove_file(self.blob_path(&key)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                error!(key = %key, error = %e, "Failed to remove blob");
                return false;
            }
        }

        if self.metadata.remove(&key).is_some() {
            self.metadata.persist().await;
        }
        true
    }

    /// Delete every blob in the directory and empty the metadata table
    #[instrument(skip(self))]
    pub async fn clear(&self) -> bool {
        let _gate = self.write_gate.lock().await;

        let files = match self.blob_files().await {
            Ok(files) => files,
            Err(e) => {
                error!(error = %e, "Failed to list cache directory");
                return false;
            }
        };

        let results =
            futures::future::join_all(files.iter().map(|(path, _)| tokio::fs::remove_file(path)))
                .await;

        let mut failed = 0usize;
        for ((path, _), result) in files.iter().zip(results) {
            if let Err(e) = result {
                if e.kind() != std::io::ErrorKind::NotFound {
                    failed += 1;
                    warn!(path = %path.display(), error = %e, "Failed to delete cached file");
                }
            }
        }

        self.metadata.clear();
        self.metadata.persist().await;

        info!(deleted = files.len() - failed, failed, "Disk cache cleared");
        failed == 0
    }

    /// Bytes used by blob files, measured on disk
    pub async fn current_size_bytes(&self) -> u64 {
        match self.scan_size().await {
            Ok(size) => size,
            Err(e) => {
                error!(error = %e, "Failed to get current cache size");
                0
            }
        }
    }

    /// Disk usage in MiB
    pub async fn current_size_mb(&self) -> f64 {
        self.current_size_bytes().await as f64 / BYTES_PER_MB as f64
    }

    async fn scan_size(&self) -> Result<u64> {
        Ok(self.blob_files().await?.iter().map(|(_, len)| len).sum())
    }

    /// Every regular file in the directory except the metadata file
    async fn blob_files(&self) -> Result<Vec<(PathBuf, u64)>> {
        let mut files = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.config.root_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e.into()),
        };

        while let Some(item) = dir.next_entry().await? {
            if item.file_name() == self.config.metadata_file_name.as_str() {
                continue;
            }
            let meta = item.metadata().await?;
            if meta.is_file() {
                files.push((item.path(), meta.len()));
            }
        }
        Ok(files)
    }

    /// Number of entries in the metadata table
    pub fn entry_count(&self) -> usize {
        self.metadata.len()
    }

    /// Wait for queued background metadata saves
    pub async fn flush(&self) {
        self.background.close();
        self.background.wait().await;
        self.background.reopen();
    }

    /// Get statistics
    pub fn stats(&self) -> DiskStats {
        DiskStats {
            entries: self.metadata.len() as u64,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            bytes_evicted: self.bytes_evicted.load(Ordering::Relaxed),
            blob_write_retries: self.write_retries.load(Ordering::Relaxed),
            metadata_write_retries: self.metadata.write_retries(),
            metadata_write_failures: self.metadata.write_failures(),
        }
    }

    /// Metadata table (read-only view)
    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    /// Get configuration
    pub fn config(&self) -> &DiskConfig {
        &self.config
    }

    /// Cache directory
    pub fn root_dir(&self) -> &Path {
        &self.config.root_dir
    }

    fn blob_path(&self, key: &CacheKey) -> PathBuf {
        self.config.root_dir.join(key.as_str())
    }
}

impl std::fmt::Debug for DiskCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskCache")
            .field("root_dir", &self.config.root_dir)
            .field("entries", &self.metadata.len())
            .finish()
    }
}

/// File length, 0 when missing
async fn file_len(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

// =============================================================================
// Tests
// =============================================================================
