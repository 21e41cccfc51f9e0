//! Cache Eviction and Retry Policies
//!
//! Configurable knobs for reclaiming disk space and retrying disk writes.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::entry::CacheEntry;
use super::{
    DEFAULT_BUDGET_BYTES, DEFAULT_EVICTION_BUFFER_BYTES, DEFAULT_MAX_RETRIES,
    DEFAULT_RETRY_BACKOFF_MS,
};
use crate::error::Result;

/// Eviction policy configuration
///
/// Strict LRU under a soft byte budget: when a write would push the tier over
/// `budget_bytes`, the least recently accessed entries are dropped until the
/// overflow plus `buffer_bytes` has been reclaimed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionPolicy {
    /// Byte budget for all blobs on disk
    pub budget_bytes: u64,
    /// Extra bytes reclaimed beyond the overflow
    pub buffer_bytes: u64,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            budget_bytes: DEFAULT_BUDGET_BYTES,
            buffer_bytes: DEFAULT_EVICTION_BUFFER_BYTES,
        }
    }
}

impl EvictionPolicy {
    /// Create a policy with the given budget and the default buffer
    pub fn with_budget(budget_bytes: u64) -> Self {
        Self {
            budget_bytes,
            ..Self::default()
        }
    }

    /// Bytes to reclaim before writing `incoming` bytes on top of `current`.
    ///
    /// Zero when the write fits.
    pub fn deficit(&self, current: u64, incoming: u64) -> u64 {
        let projected = current.saturating_add(incoming);
        if projected <= self.budget_bytes {
            return 0;
        }
        projected - self.budget_bytes + self.buffer_bytes
    }

    /// Entries sorted least recently accessed first.
    ///
    /// Ties fall back to creation time, then key, so the order is total.
    pub fn eviction_order<'a, I>(entries: I) -> Vec<&'a CacheEntry>
    where
        I: IntoIterator<Item = &'a CacheEntry>,
    {
        let mut ordered: Vec<&CacheEntry> = entries.into_iter().collect();
        ordered.sort_by(|a, b| {
            a.last_accessed_at
                .cmp(&b.last_accessed_at)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.key.cmp(&b.key))
        });
        ordered
    }
}

/// Retry policy for disk writes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts before giving up
    pub max_retries: u32,
    /// Linear backoff step in milliseconds
    pub backoff_base_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base_ms: DEFAULT_RETRY_BACKOFF_MS,
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based): `base * attempt`
    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_base_ms.saturating_mul(attempt as u64))
    }

    /// Policy that never sleeps (tests)
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff_base_ms: 0,
        }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Only transient errors are retried. Every retry bumps `retries`.
    pub async fn run<T, F, Fut>(&self, operation: &str, retries: &AtomicU64, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < attempts => {
                    retries.fetch_add(1, Ordering::Relaxed);
                    warn!(operation, attempt, error = %e, "Transient I/O failure, retrying");
                    tokio::time::sleep(self.delay(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::CacheKey;
    use chrono::{Duration as ChronoDuration, Utc};

    fn entry_aged(id: &str, size: u64, age_secs: i64) -> CacheEntry {
        let mut entry = CacheEntry::new(id, CacheKey::derive(id), size);
        let at = Utc::now() - ChronoDuration::seconds(age_secs);
        entry.created_at = at;
        entry.last_accessed_at = at;
        entry
    }

    #[test]
    fn test_default_policy() {
        let policy = EvictionPolicy::default();
        assert_eq!(policy.budget_bytes, 500 * 1024 * 1024);
        assert_eq!(policy.buffer_bytes, 1024 * 1024);
    }

    #[test]
    fn test_deficit_when_fits() {
        let policy = EvictionPolicy {
            budget_bytes: 1000,
            buffer_bytes: 10,
        };
        assert_eq!(policy.deficit(500, 500), 0);
        assert_eq!(policy.deficit(0, 0), 0);
    }

    #[test]
    fn test_deficit_includes_buffer() {
        let policy = EvictionPolicy {
            budget_bytes: 1000,
            buffer_bytes: 10,
        };
        assert_eq!(policy.deficit(800, 400), 210);
    }

    #[test]
    fn test_eviction_order_oldest_first() {
        let old = entry_aged("old", 400, 300);
        let mid = entry_aged("mid", 400, 200);
        let new = entry_aged("new", 400, 100);

        let ordered = EvictionPolicy::eviction_order([&new, &old, &mid]);
        let keys: Vec<_> = ordered.iter().map(|e| e.key.clone()).collect();
        assert_eq!(keys, vec![old.key.clone(), mid.key.clone(), new.key.clone()]);
    }

    #[test]
    fn test_eviction_order_ties_by_creation() {
        let mut first = entry_aged("first", 10, 300);
        let mut second = entry_aged("second", 10, 200);
        let touched = Utc::now();
        first.last_accessed_at = touched;
        second.last_accessed_at = touched;

        let ordered = EvictionPolicy::eviction_order([&second, &first]);
        assert_eq!(ordered[0].key, first.key);
    }

    #[test]
    fn test_linear_backoff() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.delay(1), Duration::from_millis(100));
        assert_eq!(retry.delay(2), Duration::from_millis(200));
        assert_eq!(retry.delay(3), Duration::from_millis(300));
        assert_eq!(RetryPolicy::immediate(3).delay(3), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_run_retries_transient_then_succeeds() {
        let retry = RetryPolicy::immediate(3);
        let retries = AtomicU64::new(0);
        let mut calls = 0;

        let result = retry
            .run("test", &retries, || {
                calls += 1;
                let fail = calls < 3;
                async move {
                    if fail {
                        Err(crate::error::Error::Io(std::io::Error::new(
                            std::io::ErrorKind::Other,
                            "file locked",
                        )))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls, 3);
        assert_eq!(retries.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_run_gives_up_after_max_attempts() {
        let retry = RetryPolicy::immediate(3);
        let retries = AtomicU64::new(0);
        let mut calls = 0;

        let result: Result<()> = retry
            .run("test", &retries, || {
                calls += 1;
                async {
                    Err(crate::error::Error::Io(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        "file locked",
                    )))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls, 3);
        assert_eq!(retries.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_run_does_not_retry_permanent_errors() {
        let retry = RetryPolicy::immediate(3);
        let retries = AtomicU64::new(0);
        let mut calls = 0;

        let result: Result<()> = retry
            .run("test", &retries, || {
                calls += 1;
                async { Err(crate::error::Error::Config("bad".into())) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls, 1);
        assert_eq!(retries.load(Ordering::Relaxed), 0);
    }
}
