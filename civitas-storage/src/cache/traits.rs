//! Cache store traits and statistics.
//!
//! Backends are fallible: every method returns a `CivitasResult` so the
//! caller can decide what a storage failure means. The [`DurableCache`]
//! wrapper turns those failures into misses and no-ops.
//!
//! [`DurableCache`]: super::durable::DurableCache

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use civitas_core::CivitasResult;
use serde::Serialize;

use super::entry::CacheEntry;

/// Durable key → entry storage with per-entry expiry.
///
/// # Concurrency
///
/// Implementations must allow concurrent calls from many tasks. `put` is an
/// atomic upsert-by-key: a reader sees either the previous entry or the new
/// one, never a mix.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Short backend name for status reports.
    fn name(&self) -> &'static str;

    /// Fetch the stored entry for `key` regardless of expiry.
    ///
    /// Bytes that exist but cannot be decoded come back as a storage error
    /// for which `StorageError::is_undecodable` holds, never as `Ok(None)`.
    async fn get(&self, key: &str) -> CivitasResult<Option<CacheEntry>>;

    /// Insert or replace the entry for `entry.key`.
    async fn put(&self, entry: CacheEntry) -> CivitasResult<()>;

    /// Remove one entry. Returns whether it existed.
    async fn delete(&self, key: &str) -> CivitasResult<bool>;

    /// Remove `key` only if its stored entry is expired at `now`.
    ///
    /// A check-and-delete in one step, so a lazy eviction never removes an
    /// entry that a concurrent writer just refreshed.
    async fn evict_if_expired(&self, key: &str, now: DateTime<Utc>) -> CivitasResult<bool>;

    /// Remove every entry with `expires_at < now`, plus entries that cannot
    /// be read under the current format. Returns the count removed.
    async fn delete_expired(&self, now: DateTime<Utc>) -> CivitasResult<u64>;

    /// Remove every entry whose key starts with `prefix`.
    async fn delete_prefix(&self, prefix: &str) -> CivitasResult<u64>;

    /// Remove everything. Returns the count removed.
    async fn clear(&self) -> CivitasResult<u64>;

    /// Entry counts and size at `now`.
    async fn stats(&self, now: DateTime<Utc>) -> CivitasResult<StoreStats>;
}

/// Point-in-time contents of a cache store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Number of stored entries, live or not.
    pub total: u64,
    /// Entries past their expiry that have not been swept yet.
    pub expired: u64,
    /// Approximate persisted size in bytes.
    pub approx_bytes: u64,
}

impl StoreStats {
    pub fn active(&self) -> u64 {
        self.total.saturating_sub(self.expired)
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Number of evictions due to capacity.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        hit_rate(self.hits, self.misses)
    }
}

pub(crate) fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}
