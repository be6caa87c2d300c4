//! Result of a get-or-compute read, carrying where the value came from.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Which layer answered a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSource {
    /// The durable store had a live entry.
    Durable,
    /// The fast layer had it; the durable store was backfilled.
    Fast,
    /// Nothing was cached; the value was computed.
    Computed,
}

/// Value plus provenance metadata.
///
/// Callers can inspect how old the value is before using it.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    value: T,
    cached_at: DateTime<Utc>,
    source: CacheSource,
}

impl<T> CacheRead<T> {
    pub fn from_durable(value: T, cached_at: DateTime<Utc>) -> Self {
        Self {
            value,
            cached_at,
            source: CacheSource::Durable,
        }
    }

    pub fn from_fast(value: T, cached_at: DateTime<Utc>) -> Self {
        Self {
            value,
            cached_at,
            source: CacheSource::Fast,
        }
    }

    pub fn computed(value: T) -> Self {
        Self {
            value,
            cached_at: Utc::now(),
            source: CacheSource::Computed,
        }
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn cached_at(&self) -> DateTime<Utc> {
        self.cached_at
    }

    pub fn source(&self) -> CacheSource {
        self.source
    }

    pub fn was_cache_hit(&self) -> bool {
        self.source != CacheSource::Computed
    }

    /// How long ago the value was produced.
    pub fn staleness(&self) -> Duration {
        (Utc::now() - self.cached_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> CacheRead<U> {
        CacheRead {
            value: f(self.value),
            cached_at: self.cached_at,
            source: self.source,
        }
    }
}
