//! Process-local cache store.
//!
//! Same contract as the LMDB store without durability. Used in tests and in
//! deployments that run without a writable data directory.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use civitas_core::{CivitasResult, StorageError};

use super::entry::CacheEntry;
use super::traits::{CacheStore, StoreStats};

/// In-memory [`CacheStore`].
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> CivitasResult<Option<CacheEntry>> {
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, entry: CacheEntry) -> CivitasResult<()> {
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> CivitasResult<bool> {
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.remove(key).is_some())
    }

    async fn evict_if_expired(&self, key: &str, now: DateTime<Utc>) -> CivitasResult<bool> {
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        let expired = entries.get(key).is_some_and(|e| e.is_expired_at(now));
        if expired {
            entries.remove(key);
        }
        Ok(expired)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> CivitasResult<u64> {
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired_at(now));
        Ok((before - entries.len()) as u64)
    }

    async fn delete_prefix(&self, prefix: &str) -> CivitasResult<u64> {
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }

    async fn clear(&self) -> CivitasResult<u64> {
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        let count = entries.len() as u64;
        entries.clear();
        Ok(count)
    }

    async fn stats(&self, now: DateTime<Utc>) -> CivitasResult<StoreStats> {
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(StoreStats {
            total: entries.len() as u64,
            expired: entries.values().filter(|e| e.is_expired_at(now)).count() as u64,
            approx_bytes: entries
                .values()
                .map(|e| (e.key.len() + e.value.to_string().len()) as u64)
                .sum(),
        })
    }
}
