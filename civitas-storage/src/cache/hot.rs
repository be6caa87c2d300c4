//! In-memory fast layer.
//!
//! A bounded, expiring map in front of the durable store for the hottest
//! keys. Non-authoritative: it can be dropped at any time without data loss.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;

use super::entry::expiry_after;
use super::traits::CacheStats;

#[derive(Debug, Clone)]
struct HotEntry {
    value: Value,
    inserted_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// A fast-layer hit.
#[derive(Debug, Clone, PartialEq)]
pub struct HotHit {
    pub value: Value,
    pub inserted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl HotHit {
    /// Lifetime left at `now`.
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Bounded expiring in-memory cache.
///
/// When full, expired entries are purged first; if that frees nothing the
/// entry closest to expiry is evicted.
#[derive(Debug)]
pub struct HotCache {
    entries: DashMap<String, HotEntry>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl HotCache {
    /// A capacity of zero disables the layer: inserts are dropped.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::with_capacity(capacity),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<HotHit> {
        let now = Utc::now();
        let hit = self.entries.get(key).map(|e| HotHit {
            value: e.value.clone(),
            inserted_at: e.inserted_at,
            expires_at: e.expires_at,
        });

        match hit {
            Some(hit) if now <= hit.expires_at => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(hit)
            }
            Some(_) => {
                self.entries.remove_if(key, |_, e| e.expires_at < now);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, key: &str, value: Value, ttl: Duration) {
        if self.capacity == 0 {
            return;
        }
        let now = Utc::now();
        if !self.entries.contains_key(key) && self.entries.len() >= self.capacity {
            self.make_room(now);
        }
        self.entries.insert(
            key.to_string(),
            HotEntry {
                value,
                inserted_at: now,
                expires_at: expiry_after(now, ttl),
            },
        );
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remove every key starting with `prefix`. Returns how many went.
    pub fn remove_prefix(&self, prefix: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        before.saturating_sub(self.entries.len())
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.entries.len() as u64,
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn make_room(&self, now: DateTime<Utc>) {
        let before = self.entries.len();
        self.entries.retain(|_, e| now <= e.expires_at);
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            self.evictions.fetch_add(purged as u64, Ordering::Relaxed);
            return;
        }

        // Collect first; removing while holding an iterator guard deadlocks.
        let victim = self
            .entries
            .iter()
            .min_by_key(|e| e.value().expires_at)
            .map(|e| e.key().clone());
        if let Some(victim) = victim {
            if self.entries.remove(&victim).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_and_get() {
        let hot = HotCache::new(4);
        hot.insert("k", json!(1), Duration::from_secs(60));
        let hit = hot.get("k").expect("entry should be present");
        assert_eq!(hit.value, json!(1));
        assert!(hit.remaining_ttl(Utc::now()) > Duration::from_secs(50));
        assert!(hot.get("other").is_none());

        let stats = hot.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_expired_entries_are_misses() {
        let hot = HotCache::new(4);
        hot.insert("k", json!(1), Duration::ZERO);
        std::thread::sleep(Duration::from_millis(5));
        assert!(hot.get("k").is_none());
        assert!(hot.is_empty());
    }

    #[test]
    fn test_capacity_evicts_soonest_expiry() {
        let hot = HotCache::new(2);
        hot.insert("short", json!(1), Duration::from_secs(10));
        hot.insert("long", json!(2), Duration::from_secs(1000));
        hot.insert("new", json!(3), Duration::from_secs(100));

        assert_eq!(hot.len(), 2);
        assert!(hot.get("short").is_none());
        assert!(hot.get("long").is_some());
        assert!(hot.get("new").is_some());
        assert_eq!(hot.stats().evictions, 1);
    }

    #[test]
    fn test_overwrite_at_capacity_does_not_evict() {
        let hot = HotCache::new(1);
        hot.insert("k", json!(1), Duration::from_secs(60));
        hot.insert("k", json!(2), Duration::from_secs(60));
        assert_eq!(hot.get("k").map(|h| h.value), Some(json!(2)));
        assert_eq!(hot.stats().evictions, 0);
    }

    #[test]
    fn test_remove_prefix() {
        let cache = HotCache::new(8);
        cache.insert("/api/stats:1a2b3c4d:v1", json!(1), Duration::from_secs(60));
        cache.insert("/api/stats:5e6f7a8b:v1", json!(2), Duration::from_secs(60));
        cache.insert("/api/sla", json!(3), Duration::from_secs(60));

        assert_eq!(cache.remove_prefix("/api/stats"), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("/api/sla").is_some());
    }

    #[test]
    fn test_zero_capacity_disables_layer() {
        let hot = HotCache::new(0);
        hot.insert("k", json!(1), Duration::from_secs(60));
        assert!(hot.get("k").is_none());
    }
}
