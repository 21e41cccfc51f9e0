//! Cache Metrics Collection
//!
//! Counters for the lookup path. Disk-internal counters (evictions, write
//! retries) live on `DiskCache` and are merged into the snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::disk::DiskStats;

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    requests: AtomicU64,
    memory_hits: AtomicU64,
    memory_misses: AtomicU64,
    disk_hits: AtomicU64,
    disk_misses: AtomicU64,
    disk_decode_failures: AtomicU64,
    origin_fetches: AtomicU64,
    origin_failures: AtomicU64,
    deduplicated_waits: AtomicU64,
    defaults_served: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_memory_miss(&self) {
        self.memory_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disk_hit(&self) {
        self.disk_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disk_miss(&self) {
        self.disk_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disk_decode_failure(&self) {
        self.disk_decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_origin_fetch(&self) {
        self.origin_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_origin_failure(&self) {
        self.origin_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deduplicated_wait(&self) {
        self.deduplicated_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_default_served(&self) {
        self.defaults_served.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot, merging disk counters when the disk tier is enabled
    pub fn snapshot(&self, disk: Option<DiskStats>) -> MetricsSnapshot {
        let memory_hits = self.memory_hits.load(Ordering::Relaxed);
        let memory_misses = self.memory_misses.load(Ordering::Relaxed);
        let disk_hits = self.disk_hits.load(Ordering::Relaxed);
        let disk_misses = self.disk_misses.load(Ordering::Relaxed);

        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            memory_hits,
            memory_misses,
            memory_hit_ratio: ratio(memory_hits, memory_misses),
            disk_hits,
            disk_misses,
            disk_hit_ratio: ratio(disk_hits, disk_misses),
            disk_decode_failures: self.disk_decode_failures.load(Ordering::Relaxed),
            origin_fetches: self.origin_fetches.load(Ordering::Relaxed),
            origin_failures: self.origin_failures.load(Ordering::Relaxed),
            deduplicated_waits: self.deduplicated_waits.load(Ordering::Relaxed),
            defaults_served: self.defaults_served.load(Ordering::Relaxed),
            disk: disk.unwrap_or_default(),
        }
    }
}

fn ratio(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// Point-in-time view of all counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub memory_hits: u64,
    pub memory_misses: u64,
    pub memory_hit_ratio: f64,
    pub disk_hits: u64,
    pub disk_misses: u64,
    pub disk_hit_ratio: f64,
    pub disk_decode_failures: u64,
    pub origin_fetches: u64,
    pub origin_failures: u64,
    pub deduplicated_waits: u64,
    pub defaults_served: u64,
    /// Disk tier internals
    pub disk: DiskStats,
}

// =============================================================================
// Tests
// =============================================================================
