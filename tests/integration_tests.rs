//! tiercache Integration Tests
//!
//! End-to-end checks through the public API:
//! - Disk tier: persistence, LRU eviction, self-healing metadata
//! - Tiered cache: fallthrough, de-duplication, failure handling

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tempfile::TempDir;

use tiercache::cache::{
    CacheConfig, CacheKey, CacheTier, DiskCache, DiskConfig, InMemoryOrigin, MetadataDocument,
    RawCodec, TieredCache, METADATA_FILE_NAME,
};

fn disk_config(dir: &TempDir, budget_bytes: u64) -> DiskConfig {
    let mut config = DiskConfig::at(dir.path()).with_budget(budget_bytes);
    config.eviction.buffer_bytes = 0;
    config.retry.backoff_base_ms = 1;
    config
}

// =============================================================================
// Disk Tier Tests
// =============================================================================

mod disk_tests {
    use super::*;

    #[tokio::test]
    async fn test_lru_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let disk = DiskCache::open(disk_config(&dir, 1000)).await.unwrap();

        assert!(disk.save("x", &[b'x'; 400]).await);
        assert!(disk.save("y", &[b'y'; 400]).await);
        assert!(disk.save("z", &[b'z'; 400]).await);

        assert!(!disk.has("x").await);
        assert!(disk.has("y").await);
        assert!(disk.has("z").await);
        assert_eq!(disk.current_size_bytes().await, 800);
        assert_eq!(disk.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_least_recently_read_evicted_first() {
        let dir = tempfile::tempdir().unwrap();
        let disk = DiskCache::open(disk_config(&dir, 1000)).await.unwrap();

        assert!(disk.save("a", &[1; 400]).await);
        assert!(disk.save("b", &[2; 400]).await);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(disk.load("a").await.is_some());

        assert!(disk.save("c", &[3; 400]).await);
        assert!(disk.has("a").await);
        assert!(!disk.has("b").await);
    }

    #[tokio::test]
    async fn test_empty_identifier_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let disk = DiskCache::open(disk_config(&dir, 1000)).await.unwrap();
        let before = disk.current_size_bytes().await;

        assert!(!disk.save("", b"some bytes").await);
        assert_eq!(disk.current_size_bytes().await, before);
        assert_eq!(disk.entry_count(), 0);

        let files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != METADATA_FILE_NAME)
            .collect();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_identifier_misses() {
        let dir = tempfile::tempdir().unwrap();
        let disk = DiskCache::open(disk_config(&dir, 1000)).await.unwrap();

        assert!(disk.load("unknown-id").await.is_none());
        assert!(!dir
            .path()
            .join(CacheKey::derive("unknown-id").as_str())
            .exists());
        assert_eq!(disk.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_corrupt_metadata_self_heals() {
        let dir = tempfile::tempdir().unwrap();
        let metadata_path = dir.path().join(METADATA_FILE_NAME);
        std::fs::write(&metadata_path, "{ this is not json").unwrap();

        let disk = DiskCache::open(disk_config(&dir, 1000)).await.unwrap();
        assert_eq!(disk.entry_count(), 0);

        let rewritten = std::fs::read_to_string(&metadata_path).unwrap();
        let document: MetadataDocument = serde_json::from_str(&rewritten).unwrap();
        assert!(document.entries.is_empty());
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let disk = DiskCache::open(disk_config(&dir, 1 << 20)).await.unwrap();
        let blob: Vec<u8> = (0..=255u8).cycle().take(4096).collect();

        assert!(disk.save("https://cdn.example/a.png", &blob).await);
        let loaded = disk.load("https://cdn.example/a.png").await.unwrap();
        assert_eq!(loaded.as_ref(), blob.as_slice());
    }

    #[tokio::test]
    async fn test_remove_absent_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let disk = DiskCache::open(disk_config(&dir, 1000)).await.unwrap();

        assert!(disk.save("kept", b"kept").await);
        assert!(disk.remove("never-saved").await);
        assert!(disk.has("kept").await);
        assert_eq!(disk.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_blob_pruned_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let disk = DiskCache::open(disk_config(&dir, 1000)).await.unwrap();
            assert!(disk.save("gone", b"payload").await);
            assert!(disk.save("stays", b"payload").await);
            disk.flush().await;
        }

        std::fs::remove_file(dir.path().join(CacheKey::derive("gone").as_str())).unwrap();

        let disk = DiskCache::open(disk_config(&dir, 1000)).await.unwrap();
        assert!(!disk.has("gone").await);
        assert!(disk.has("stays").await);
        assert_eq!(disk.entry_count(), 1);

        // The pruned table was written back.
        let raw = std::fs::read_to_string(dir.path().join(METADATA_FILE_NAME)).unwrap();
        let document: MetadataDocument = serde_json::from_str(&raw).unwrap();
        assert_eq!(document.entries.len(), 1);
        assert_eq!(document.entries[0].source_id, "stays");
    }

    #[tokio::test]
    async fn test_metadata_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let disk = DiskCache::open(disk_config(&dir, 1000)).await.unwrap();
        assert!(disk.save("https://cdn.example/b.png", b"12345").await);

        let raw = std::fs::read_to_string(dir.path().join(METADATA_FILE_NAME)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let entry = &value["entries"][0];
        assert_eq!(entry["sourceId"], "https://cdn.example/b.png");
        assert_eq!(entry["key"], CacheKey::derive("https://cdn.example/b.png").as_str());
        assert_eq!(entry["sizeBytes"], 5);
        assert!(entry["createdAt"].is_string());
        assert!(entry["lastAccessedAt"].is_string());
    }
}

// =============================================================================
// Tiered Cache Tests
// =============================================================================

mod tiered_tests {
    use super::*;

    const URL: &str = "https://cdn.example/cards/151.png";

    async fn open(dir: &TempDir, origin: Arc<InMemoryOrigin>) -> TieredCache<RawCodec> {
        let config = CacheConfig {
            disk: disk_config(dir, 1 << 20),
            ..CacheConfig::default()
        };
        TieredCache::open(config, RawCodec, origin, Bytes::from_static(b"fallback"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_fallthrough_and_population() {
        let dir = tempfile::tempdir().unwrap();
        let origin = Arc::new(InMemoryOrigin::new());
        origin.insert(URL, "mew");
        let cache = open(&dir, origin.clone()).await;

        assert!(!cache.is_cached(URL));
        assert_eq!(cache.get_or_fetch(URL).await, Bytes::from_static(b"mew"));
        assert!(cache.is_cached(URL));
        assert_eq!(cache.entry_count(), 1);
        assert_eq!(cache.current_disk_usage_bytes().await, 3);
        assert_eq!(origin.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_disk_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let origin = Arc::new(InMemoryOrigin::new());
        origin.insert(URL, "mew");
        {
            let cache = open(&dir, origin.clone()).await;
            cache.get_or_fetch(URL).await;
            cache.flush().await;
        }

        let cache = open(&dir, origin.clone()).await;
        let fetched = cache.get_or_fetch_with_source(URL).await;
        assert_eq!(fetched.source, CacheTier::Disk);
        assert_eq!(fetched.value, Bytes::from_static(b"mew"));
        assert_eq!(origin.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let origin = Arc::new(InMemoryOrigin::with_latency(Duration::from_millis(100)));
        origin.insert(URL, "mew");
        let cache = open(&dir, origin.clone()).await;

        let results =
            futures::future::join_all((0..32).map(|_| cache.get_or_fetch(URL))).await;

        assert!(results.iter().all(|v| v == &Bytes::from_static(b"mew")));
        assert_eq!(origin.fetch_count(), 1);
        assert!(cache.metrics().deduplicated_waits >= 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_releases_waiters() {
        let dir = tempfile::tempdir().unwrap();
        let origin = Arc::new(InMemoryOrigin::with_latency(Duration::from_millis(50)));
        let cache = open(&dir, origin.clone()).await;

        let results = tokio::time::timeout(
            Duration::from_secs(5),
            futures::future::join_all((0..8).map(|_| cache.get_or_fetch(URL))),
        )
        .await
        .expect("waiters must not hang");

        assert!(results.iter().all(|v| v == &Bytes::from_static(b"fallback")));
        assert_eq!(origin.fetch_count(), 1);
        assert!(!cache.is_cached(URL));
    }

    #[tokio::test]
    async fn test_empty_identifier_serves_default() {
        let dir = tempfile::tempdir().unwrap();
        let origin = Arc::new(InMemoryOrigin::new());
        let cache = open(&dir, origin.clone()).await;

        assert_eq!(cache.get_or_fetch("").await, Bytes::from_static(b"fallback"));
        assert!(!cache.is_cached(""));
        assert_eq!(origin.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_clear_all_forces_refetch() {
        let dir = tempfile::tempdir().unwrap();
        let origin = Arc::new(InMemoryOrigin::new());
        origin.insert(URL, "mew");
        let cache = open(&dir, origin.clone()).await;

        cache.get_or_fetch(URL).await;
        assert!(cache.clear_all().await);
        assert_eq!(cache.entry_count(), 0);

        let fetched = cache.get_or_fetch_with_source(URL).await;
        assert_eq!(fetched.source, CacheTier::Origin);
        assert_eq!(origin.fetch_count(), 2);
    }
}

// =============================================================================
// Property Tests
// =============================================================================

mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_budget_holds(sizes in proptest::collection::vec(1usize..=400, 1..12)) {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async {
                let dir = tempfile::tempdir().unwrap();
                let disk = DiskCache::open(disk_config(&dir, 1000)).await.unwrap();

                for (i, size) in sizes.iter().enumerate() {
                    assert!(disk.save(&format!("blob-{}", i), &vec![7u8; *size]).await);
                    assert!(disk.current_size_bytes().await <= 1000);
                }
                disk.flush().await;
            });
        }

        #[test]
        fn prop_key_is_stable(id in "[a-z0-9:/._-]{1,128}") {
            let key = CacheKey::derive(&id);
            prop_assert_eq!(&key, &CacheKey::derive(&id));
            prop_assert!(key.is_well_formed());
        }
    }
}
