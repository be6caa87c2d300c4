//! Cache store whose failures can be switched on and off.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use civitas_core::{CivitasResult, StorageError};
use civitas_storage::{CacheEntry, CacheStore, MemoryCacheStore, StoreStats};

/// In-memory store that fails every call while `failing` is set.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryCacheStore,
    failing: AtomicBool,
    failed_calls: AtomicU64,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts out failing.
    pub fn down() -> Self {
        let store = Self::new();
        store.set_failing(true);
        store
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Calls rejected so far.
    pub fn failed_calls(&self) -> u64 {
        self.failed_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> CivitasResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            self.failed_calls.fetch_add(1, Ordering::SeqCst);
            return Err(StorageError::Unavailable {
                reason: "store switched off by test".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for FlakyStore {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn get(&self, key: &str) -> CivitasResult<Option<CacheEntry>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn put(&self, entry: CacheEntry) -> CivitasResult<()> {
        self.check()?;
        self.inner.put(entry).await
    }

    async fn delete(&self, key: &str) -> CivitasResult<bool> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn evict_if_expired(&self, key: &str, now: DateTime<Utc>) -> CivitasResult<bool> {
        self.check()?;
        self.inner.evict_if_expired(key, now).await
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> CivitasResult<u64> {
        self.check()?;
        self.inner.delete_expired(now).await
    }

    async fn delete_prefix(&self, prefix: &str) -> CivitasResult<u64> {
        self.check()?;
        self.inner.delete_prefix(prefix).await
    }

    async fn clear(&self) -> CivitasResult<u64> {
        self.check()?;
        self.inner.clear().await
    }

    async fn stats(&self, now: DateTime<Utc>) -> CivitasResult<StoreStats> {
        self.check()?;
        self.inner.stats(now).await
    }
}
