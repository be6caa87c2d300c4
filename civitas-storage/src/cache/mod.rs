//! Expiring cache layer for aggregate results.
//!
//! # Layers
//!
//! - [`CacheStore`]: fallible durable storage ([`LmdbCacheStore`],
//!   [`MemoryCacheStore`])
//! - [`DurableCache`]: the store contract callers use; storage failures become
//!   misses and no-ops, logged and counted
//! - [`HotCache`]: optional in-memory fast layer
//! - [`AggregationCache`]: typed get-or-compute over both
//!
//! # Example
//!
//! ```ignore
//! let store = Arc::new(LmdbCacheStore::new("./data/cache", 256)?);
//! let cache = AggregationCache::new(DurableCache::new(store))
//!     .with_fast_layer(Arc::new(HotCache::new(512)));
//!
//! let read = cache
//!     .get_or_compute("by-month", Duration::from_secs(3600), || source.by_month())
//!     .await?;
//! if read.staleness() > Duration::from_secs(1800) {
//!     tracing::debug!("by-month is getting old");
//! }
//! ```

pub mod aggregation;
pub mod durable;
pub mod entry;
pub mod hot;
pub mod lmdb_backend;
pub mod memory_backend;
pub mod read;
pub mod traits;

pub use aggregation::AggregationCache;
pub use durable::{CacheMetrics, CacheMetricsSnapshot, CacheStatus, DurableCache};
pub use entry::CacheEntry;
pub use hot::{HotCache, HotHit};
pub use lmdb_backend::{LmdbCacheError, LmdbCacheStore};
pub use memory_backend::MemoryCacheStore;
pub use read::{CacheRead, CacheSource};
pub use traits::{CacheStats, CacheStore, StoreStats};
