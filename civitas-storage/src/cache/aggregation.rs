//! Get-or-compute cache for expensive aggregate results.
//!
//! Lookup order:
//!
//! 1. durable store: survives restarts and is shared between processes that
//!    open the same store
//! 2. fast layer (if any): a hit here backfills the durable store
//! 3. compute: the result is written to both layers
//!
//! There is no cross-process single-flight. Concurrent callers that miss the
//! same key each run their compute function.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use civitas_core::{CivitasResult, ComputeError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::durable::DurableCache;
use super::hot::HotCache;
use super::read::CacheRead;

/// Typed get-or-compute wrapper around a [`DurableCache`].
#[derive(Debug, Clone)]
pub struct AggregationCache {
    durable: DurableCache,
    fast: Option<Arc<HotCache>>,
}

impl AggregationCache {
    pub fn new(durable: DurableCache) -> Self {
        Self {
            durable,
            fast: None,
        }
    }

    /// Attach a fast layer used by [`get_or_compute`](Self::get_or_compute).
    pub fn with_fast_layer(mut self, fast: Arc<HotCache>) -> Self {
        self.fast = Some(fast);
        self
    }

    pub fn durable(&self) -> &DurableCache {
        &self.durable
    }

    pub fn fast_layer(&self) -> Option<&Arc<HotCache>> {
        self.fast.as_ref()
    }

    /// Return the cached value for `key` or compute, store and return it,
    /// using the configured fast layer.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> CivitasResult<CacheRead<T>>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = CivitasResult<T>> + Send,
    {
        self.get_or_compute_with(key, ttl, compute, self.fast.as_deref())
            .await
    }

    /// Same as [`get_or_compute`](Self::get_or_compute) with an explicit fast
    /// layer (or none).
    ///
    /// # Errors
    ///
    /// Only compute failures and unserializable results are returned. Storage
    /// failures degrade to a recomputation.
    pub async fn get_or_compute_with<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
        fast: Option<&HotCache>,
    ) -> CivitasResult<CacheRead<T>>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = CivitasResult<T>> + Send,
    {
        if let Some(entry) = self.durable.get_entry(key).await {
            match serde_json::from_value::<T>(entry.value) {
                Ok(value) => {
                    tracing::trace!(key, "Aggregate served from durable cache");
                    return Ok(CacheRead::from_durable(value, entry.created_at));
                }
                Err(e) => {
                    tracing::warn!(key, error = %e, "Cached aggregate has unexpected shape, recomputing");
                }
            }
        }

        if let Some(fast) = fast {
            if let Some(hit) = fast.get(key) {
                let backfill_ttl = hit.remaining_ttl(Utc::now()).min(ttl);
                match serde_json::from_value::<T>(hit.value.clone()) {
                    Ok(value) => {
                        if !backfill_ttl.is_zero() {
                            self.durable.set(key, hit.value, backfill_ttl).await;
                        }
                        tracing::debug!(key, "Aggregate served from fast layer, durable store backfilled");
                        return Ok(CacheRead::from_fast(value, hit.inserted_at));
                    }
                    Err(e) => {
                        fast.remove(key);
                        tracing::warn!(key, error = %e, "Fast-layer aggregate has unexpected shape, recomputing");
                    }
                }
            }
        }

        let started = std::time::Instant::now();
        let value = compute().await?;
        let encoded = encode(key, &value)?;

        self.durable.set(key, encoded.clone(), ttl).await;
        if let Some(fast) = fast {
            fast.insert(key, encoded, ttl);
        }

        tracing::debug!(
            key,
            ttl_secs = ttl.as_secs(),
            compute_ms = started.elapsed().as_millis() as u64,
            "Aggregate computed and cached"
        );
        Ok(CacheRead::computed(value))
    }

    /// Write a precomputed value into both layers.
    ///
    /// Returns whether the durable write landed.
    pub async fn put<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> CivitasResult<bool> {
        let encoded = encode(key, value)?;
        if let Some(fast) = &self.fast {
            fast.insert(key, encoded.clone(), ttl);
        }
        Ok(self.durable.set(key, encoded, ttl).await)
    }

    /// Drop `key` from both layers.
    pub async fn invalidate(&self, key: &str) {
        if let Some(fast) = &self.fast {
            fast.remove(key);
        }
        self.durable.delete(key).await;
    }

    /// Drop keys starting with `prefix` from both layers. Returns the durable
    /// count removed.
    pub async fn invalidate_prefix(&self, prefix: &str) -> u64 {
        if let Some(fast) = &self.fast {
            fast.remove_prefix(prefix);
        }
        self.durable.invalidate_prefix(prefix).await
    }

    /// Drop everything from both layers. Returns the durable count removed.
    pub async fn clear(&self) -> u64 {
        if let Some(fast) = &self.fast {
            fast.clear();
        }
        self.durable.clear_all().await
    }
}

fn encode<T: Serialize>(key: &str, value: &T) -> CivitasResult<Value> {
    serde_json::to_value(value).map_err(|e| {
        ComputeError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory_backend::MemoryCacheStore;
    use crate::cache::read::CacheSource;
    use civitas_core::CivitasError;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct MonthBucket {
        ym: String,
        count: u64,
    }

    fn months() -> Vec<MonthBucket> {
        vec![
            MonthBucket {
                ym: "2024-01".to_string(),
                count: 3,
            },
            MonthBucket {
                ym: "2024-02".to_string(),
                count: 0,
            },
        ]
    }

    fn new_cache() -> AggregationCache {
        AggregationCache::new(DurableCache::new(Arc::new(MemoryCacheStore::new())))
    }

    #[tokio::test]
    async fn test_cold_miss_computes_once_then_serves_cached() {
        let cache = new_cache();
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let ttl = Duration::from_secs(3600);

        let first = cache
            .get_or_compute("by-month", ttl, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(months())
            })
            .await
            .expect("compute should succeed");
        assert_eq!(first.source(), CacheSource::Computed);

        let entry = cache
            .durable()
            .get_entry("by-month")
            .await
            .expect("value should be stored");
        let expected_expiry = entry.created_at + chrono::Duration::seconds(3600);
        assert!((entry.expires_at - expected_expiry).num_milliseconds().abs() <= 1);

        let second = cache
            .get_or_compute("by-month", ttl, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(months())
            })
            .await
            .expect("cached read should succeed");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.source(), CacheSource::Durable);
        assert_eq!(second.into_value(), months());
    }

    #[tokio::test]
    async fn test_fast_layer_hit_backfills_durable() {
        let cache = new_cache();
        let fast = HotCache::new(8);
        fast.insert(
            "by-month",
            serde_json::to_value(months()).expect("serializable"),
            Duration::from_secs(600),
        );

        let read = cache
            .get_or_compute_with(
                "by-month",
                Duration::from_secs(3600),
                || async { Err::<Vec<MonthBucket>, _>(CivitasError::from(ComputeError::UnknownKey { key: "unused".into() })) },
                Some(&fast),
            )
            .await
            .expect("fast hit should succeed");

        assert_eq!(read.source(), CacheSource::Fast);
        let backfilled = cache
            .durable()
            .get_entry("by-month")
            .await
            .expect("durable store should be backfilled");
        assert!(backfilled.remaining_ttl(Utc::now()) <= Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_compute_writes_fast_layer() {
        let cache = new_cache().with_fast_layer(Arc::new(HotCache::new(8)));
        cache
            .get_or_compute("summary", Duration::from_secs(60), || async { Ok(42u64) })
            .await
            .expect("compute should succeed");

        let fast = cache.fast_layer().expect("fast layer configured");
        assert_eq!(fast.get("summary").map(|h| h.value), Some(serde_json::json!(42)));
    }

    #[tokio::test]
    async fn test_compute_error_propagates_and_caches_nothing() {
        let cache = new_cache();
        let result = cache
            .get_or_compute("broken", Duration::from_secs(60), || async {
                Err::<u64, _>(CivitasError::from(ComputeError::QueryFailed {
                    query: "count".into(),
                    reason: "connection reset".into(),
                }))
            })
            .await;

        assert!(matches!(result, Err(CivitasError::Compute(_))));
        assert!(cache.durable().get("broken").await.is_none());
    }

    #[tokio::test]
    async fn test_shape_mismatch_recomputes() {
        let cache = new_cache();
        cache
            .durable()
            .set("summary", serde_json::json!("not a number"), Duration::from_secs(60))
            .await;

        let read = cache
            .get_or_compute("summary", Duration::from_secs(60), || async { Ok(7u64) })
            .await
            .expect("recompute should succeed");
        assert_eq!(read.source(), CacheSource::Computed);
        assert_eq!(cache.durable().get("summary").await, Some(serde_json::json!(7)));
    }

    #[tokio::test]
    async fn test_invalidate_clears_both_layers() {
        let cache = new_cache().with_fast_layer(Arc::new(HotCache::new(8)));
        cache
            .put("by-theme", &vec![1, 2, 3], Duration::from_secs(60))
            .await
            .expect("put should succeed");

        cache.invalidate("by-theme").await;
        assert!(cache.durable().get("by-theme").await.is_none());
        assert!(cache.fast_layer().and_then(|f| f.get("by-theme")).is_none());
    }

    #[tokio::test]
    async fn test_invalidate_prefix_spares_other_keys() {
        let cache = new_cache().with_fast_layer(Arc::new(HotCache::new(8)));
        let ttl = Duration::from_secs(60);
        cache.put("overview:v1:a", &1, ttl).await.expect("put should succeed");
        cache.put("overview:v1:b", &2, ttl).await.expect("put should succeed");
        cache.put("summary", &3, ttl).await.expect("put should succeed");

        assert_eq!(cache.invalidate_prefix("overview:").await, 2);
        assert!(cache.durable().get("overview:v1:a").await.is_none());
        assert_eq!(cache.durable().get("summary").await, Some(serde_json::json!(3)));
        assert_eq!(cache.fast_layer().map(|f| f.len()), Some(1));
        assert!(cache.fast_layer().and_then(|f| f.get("overview:v1:a")).is_none());
    }
}
