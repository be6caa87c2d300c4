//! Failure-tolerant front for a [`CacheStore`].
//!
//! Storage errors never reach the caller: a failed read is a miss, a failed
//! write or delete is a no-op. Each swallowed error is logged and counted in
//! [`CacheMetrics::storage_errors`] so a degraded cache stays visible.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use civitas_core::{CivitasError, CivitasResult, StorageError};
use serde::Serialize;
use serde_json::Value;

use super::entry::CacheEntry;
use super::traits::{hit_rate, CacheStore, StoreStats};

// ============================================================================
// METRICS
// ============================================================================

/// Counters for durable cache activity since startup.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub writes: AtomicU64,
    /// Expired entries removed on read
    pub lazy_evictions: AtomicU64,
    /// Backend errors converted into misses or no-ops
    pub storage_errors: AtomicU64,
    /// Unix millis of the last successful write, 0 if none
    last_write_millis: AtomicI64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_write_at(&self) -> Option<DateTime<Utc>> {
        match self.last_write_millis.load(Ordering::Relaxed) {
            0 => None,
            millis => DateTime::from_timestamp_millis(millis),
        }
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            lazy_evictions: self.lazy_evictions.load(Ordering::Relaxed),
            storage_errors: self.storage_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of cache metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub lazy_evictions: u64,
    pub storage_errors: u64,
}

/// Report returned by [`DurableCache::status`].
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub backend: &'static str,
    /// False when the backend could not produce statistics.
    pub available: bool,
    pub total: u64,
    pub active: u64,
    pub expired: u64,
    pub approx_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub storage_errors: u64,
    pub last_write_at: Option<DateTime<Utc>>,
}

// ============================================================================
// DURABLE CACHE
// ============================================================================

/// Expiring key → value cache over a durable store.
///
/// Cheap to clone; clones share the store and the metrics.
#[derive(Clone)]
pub struct DurableCache {
    store: Arc<dyn CacheStore>,
    metrics: Arc<CacheMetrics>,
}

impl DurableCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            metrics: Arc::new(CacheMetrics::new()),
        }
    }

    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    /// Value for `key` if a live entry exists.
    pub async fn get(&self, key: &str) -> Option<Value> {
        self.get_entry(key).await.map(|entry| entry.value)
    }

    /// Live entry for `key`, with its timestamps.
    ///
    /// An expired or undecodable entry is reported absent and removed from
    /// the store.
    pub async fn get_entry(&self, key: &str) -> Option<CacheEntry> {
        let now = Utc::now();
        let entry = match self.store.get(key).await {
            Err(CivitasError::Storage(e)) if e.is_undecodable() => {
                self.evict_undecodable(key, &e).await;
                None
            }
            result => self.degrade("get", key, result, None),
        };

        match entry {
            Some(entry) if entry.is_live_at(now) => {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            Some(_) => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                let evicted = self.degrade(
                    "evict",
                    key,
                    self.store.evict_if_expired(key, now).await,
                    false,
                );
                if evicted {
                    self.metrics.lazy_evictions.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(key, "Evicted expired cache entry on read");
                }
                None
            }
            None => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Drop bytes that will never decode so the next write starts clean.
    async fn evict_undecodable(&self, key: &str, error: &StorageError) {
        let evicted = self.degrade("evict", key, self.store.delete(key).await, false);
        if evicted {
            self.metrics.lazy_evictions.fetch_add(1, Ordering::Relaxed);
        }
        tracing::debug!(key, error = %error, evicted, "Evicted undecodable cache entry on read");
    }

    /// Upsert `key` with `expires_at = now + ttl`. Returns false if the write
    /// did not reach the store.
    pub async fn set(&self, key: &str, value: Value, ttl: Duration) -> bool {
        let entry = CacheEntry::new(key, value, ttl);
        let written = self.degrade("set", key, self.store.put(entry).await.map(|_| true), false);
        if written {
            self.metrics.writes.fetch_add(1, Ordering::Relaxed);
            self.metrics
                .last_write_millis
                .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        }
        written
    }

    /// Remove one entry. Absent keys are not an error.
    pub async fn delete(&self, key: &str) -> bool {
        self.degrade("delete", key, self.store.delete(key).await.map(|_| true), false)
    }

    /// Remove every expired entry. Returns how many were removed.
    pub async fn delete_expired(&self) -> u64 {
        let removed = self.degrade(
            "delete_expired",
            "*",
            self.store.delete_expired(Utc::now()).await,
            0,
        );
        if removed > 0 {
            tracing::debug!(removed, "Swept expired cache entries");
        }
        removed
    }

    /// Remove everything. Returns how many entries were removed.
    pub async fn clear_all(&self) -> u64 {
        let removed = self.degrade("clear_all", "*", self.store.clear().await, 0);
        tracing::info!(removed, "Cache cleared");
        removed
    }

    /// Remove every entry whose key starts with `prefix`.
    pub async fn invalidate_prefix(&self, prefix: &str) -> u64 {
        let removed = self.degrade(
            "invalidate_prefix",
            prefix,
            self.store.delete_prefix(prefix).await,
            0,
        );
        tracing::debug!(prefix, removed, "Invalidated cache prefix");
        removed
    }

    /// Current contents and counters.
    pub async fn status(&self) -> CacheStatus {
        let stats = self.store.stats(Utc::now()).await;
        let available = stats.is_ok();
        let stats = self.degrade("status", "*", stats, StoreStats::default());
        let metrics = self.metrics.snapshot();

        CacheStatus {
            backend: self.store.name(),
            available,
            total: stats.total,
            active: stats.active(),
            expired: stats.expired,
            approx_bytes: stats.approx_bytes,
            hits: metrics.hits,
            misses: metrics.misses,
            hit_rate: hit_rate(metrics.hits, metrics.misses),
            storage_errors: metrics.storage_errors,
            last_write_at: self.metrics.last_write_at(),
        }
    }

    /// Replace a backend error with `fallback`, logging and counting it.
    fn degrade<T>(&self, operation: &'static str, key: &str, result: CivitasResult<T>, fallback: T) -> T {
        match result {
            Ok(value) => value,
            Err(e) => {
                self.metrics.storage_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    operation,
                    key,
                    backend = self.store.name(),
                    error = %e,
                    "Cache storage error, continuing without cache"
                );
                fallback
            }
        }
    }
}

impl std::fmt::Debug for DurableCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableCache")
            .field("backend", &self.store.name())
            .field("metrics", &self.metrics.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory_backend::MemoryCacheStore;
    use async_trait::async_trait;
    use civitas_core::StorageError;
    use serde_json::json;

    /// Backend whose every call fails.
    struct DownStore;

    fn down<T>() -> CivitasResult<T> {
        Err(StorageError::Unavailable {
            reason: "disk detached".to_string(),
        }
        .into())
    }

    #[async_trait]
    impl CacheStore for DownStore {
        fn name(&self) -> &'static str {
            "down"
        }
        async fn get(&self, _key: &str) -> CivitasResult<Option<CacheEntry>> {
            down()
        }
        async fn put(&self, _entry: CacheEntry) -> CivitasResult<()> {
            down()
        }
        async fn delete(&self, _key: &str) -> CivitasResult<bool> {
            down()
        }
        async fn evict_if_expired(&self, _key: &str, _now: DateTime<Utc>) -> CivitasResult<bool> {
            down()
        }
        async fn delete_expired(&self, _now: DateTime<Utc>) -> CivitasResult<u64> {
            down()
        }
        async fn delete_prefix(&self, _prefix: &str) -> CivitasResult<u64> {
            down()
        }
        async fn clear(&self) -> CivitasResult<u64> {
            down()
        }
        async fn stats(&self, _now: DateTime<Utc>) -> CivitasResult<StoreStats> {
            down()
        }
    }

    fn memory_cache() -> DurableCache {
        DurableCache::new(Arc::new(MemoryCacheStore::new()))
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = memory_cache();
        assert!(cache.set("summary", json!({"total": 1}), Duration::from_secs(60)).await);
        assert_eq!(cache.get("summary").await, Some(json!({"total": 1})));
        assert_eq!(cache.metrics().snapshot().hits, 1);
        assert!(cache.metrics().last_write_at().is_some());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = memory_cache();
        cache.set("k", json!("v"), Duration::from_secs(1)).await;
        assert_eq!(cache.get("k").await, Some(json!("v")));

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(cache.get("k").await, None);
        assert_eq!(cache.metrics().snapshot().lazy_evictions, 1);
        assert_eq!(cache.status().await.total, 0);
    }

    #[tokio::test]
    async fn test_delete_absent_key_is_not_error() {
        let cache = memory_cache();
        assert!(cache.delete("never-written").await);
        assert_eq!(cache.metrics().snapshot().storage_errors, 0);
    }

    #[tokio::test]
    async fn test_clear_all_and_prefix() {
        let cache = memory_cache();
        cache.set("overview:aaaa:v1", json!(1), Duration::from_secs(60)).await;
        cache.set("overview:bbbb:v1", json!(2), Duration::from_secs(60)).await;
        cache.set("status:cccc:v1", json!(3), Duration::from_secs(60)).await;

        assert_eq!(cache.invalidate_prefix("overview:").await, 2);
        assert_eq!(cache.clear_all().await, 1);
        assert_eq!(cache.status().await.total, 0);
    }

    #[tokio::test]
    async fn test_storage_outage_degrades_to_miss() {
        let cache = DurableCache::new(Arc::new(DownStore));

        assert!(!cache.set("k", json!(1), Duration::from_secs(60)).await);
        assert_eq!(cache.get("k").await, None);
        assert!(!cache.delete("k").await);
        assert_eq!(cache.delete_expired().await, 0);
        assert_eq!(cache.clear_all().await, 0);

        let status = cache.status().await;
        assert!(!status.available);
        assert_eq!(status.backend, "down");
        assert_eq!(status.storage_errors, 6);
    }
}
