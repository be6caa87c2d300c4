//! CIVITAS Storage - Aggregation Cache
//!
//! Durable expiring key/value storage for precomputed dashboard aggregates,
//! with an in-memory fast layer and a get-or-compute front.

pub mod cache;

pub use cache::{
    AggregationCache, CacheEntry, CacheMetrics, CacheMetricsSnapshot, CacheRead, CacheSource,
    CacheStats, CacheStatus, CacheStore, DurableCache, HotCache, HotHit, LmdbCacheError,
    LmdbCacheStore, MemoryCacheStore, StoreStats,
};
