//! Configuration types

use crate::constants::{
    DEFAULT_CACHE_MAX_SIZE_MB, DEFAULT_CACHE_PATH, DEFAULT_HOT_CACHE_CAPACITY,
    DEFAULT_REBUILD_TTL_SECS, DEFAULT_SWEEP_INTERVAL_SECS,
};
use crate::ttl::TtlPolicy;
use crate::{CivitasError, CivitasResult, ConfigError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Read an environment variable and parse it, falling back to `default` when
/// the variable is unset or unparseable.
pub fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Read a boolean flag; anything other than `true`/`1`/`yes` is false.
pub fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|s| matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

/// Server-side cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Directory of the LMDB environment
    pub path: PathBuf,
    /// LMDB map size in megabytes
    pub max_size_mb: usize,
    /// Entry capacity of the in-memory fast layer (0 disables it)
    pub hot_capacity: usize,
    /// Lifetime of keys written by the cache builder
    pub rebuild_ttl: Duration,
    /// Interval between expired-entry sweeps
    pub sweep_interval: Duration,
    /// Per-class TTL overrides; the aggregate class follows `rebuild_ttl`
    pub ttl_policy: TtlPolicy,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_CACHE_PATH),
            max_size_mb: DEFAULT_CACHE_MAX_SIZE_MB,
            hot_capacity: DEFAULT_HOT_CACHE_CAPACITY,
            rebuild_ttl: Duration::from_secs(DEFAULT_REBUILD_TTL_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            ttl_policy: TtlPolicy::default(),
        }
    }
}

impl CacheSettings {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `CIVITAS_CACHE_PATH`: LMDB directory (default: ./data/cache)
    /// - `CIVITAS_CACHE_MAX_SIZE_MB`: LMDB map size (default: 256)
    /// - `CIVITAS_HOT_CACHE_CAPACITY`: fast layer capacity (default: 512)
    /// - `CIVITAS_REBUILD_TTL_SECS`: builder key lifetime (default: 90000)
    /// - `CIVITAS_SWEEP_INTERVAL_SECS`: expired sweep interval (default: 600)
    /// - `CIVITAS_TTL_<CLASS>_SECS`: per-class TTL overrides
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            path: std::env::var("CIVITAS_CACHE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.path),
            max_size_mb: env_or("CIVITAS_CACHE_MAX_SIZE_MB", defaults.max_size_mb),
            hot_capacity: env_or("CIVITAS_HOT_CACHE_CAPACITY", defaults.hot_capacity),
            rebuild_ttl: Duration::from_secs(env_or(
                "CIVITAS_REBUILD_TTL_SECS",
                defaults.rebuild_ttl.as_secs(),
            )),
            sweep_interval: Duration::from_secs(env_or(
                "CIVITAS_SWEEP_INTERVAL_SECS",
                defaults.sweep_interval.as_secs(),
            )),
            ttl_policy: TtlPolicy::from_env(),
        }
    }

    /// Small, short-lived settings for local work.
    pub fn development() -> Self {
        Self {
            path: PathBuf::from("./data/dev-cache"),
            max_size_mb: 32,
            hot_capacity: 64,
            rebuild_ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
            ttl_policy: TtlPolicy::default(),
        }
    }

    pub fn production() -> Self {
        Self {
            max_size_mb: 1024,
            hot_capacity: 2048,
            ..Self::default()
        }
    }

    /// Builder-style path override.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_hot_capacity(mut self, capacity: usize) -> Self {
        self.hot_capacity = capacity;
        self
    }

    pub fn with_rebuild_ttl(mut self, ttl: Duration) -> Self {
        self.rebuild_ttl = ttl;
        self
    }

    /// TTL table handed to the cache builder: the configured overrides with
    /// builder keys living for `rebuild_ttl`.
    pub fn effective_ttl_policy(&self) -> TtlPolicy {
        self.ttl_policy.clone().with_rebuild_ttl(self.rebuild_ttl)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - max_size_mb > 0
    /// - rebuild_ttl and sweep_interval are positive
    pub fn validate(&self) -> CivitasResult<()> {
        if self.max_size_mb == 0 {
            return Err(CivitasError::Config(ConfigError::InvalidValue {
                field: "max_size_mb".to_string(),
                value: self.max_size_mb.to_string(),
                reason: "max_size_mb must be greater than 0".to_string(),
            }));
        }

        if self.rebuild_ttl.is_zero() {
            return Err(CivitasError::Config(ConfigError::InvalidValue {
                field: "rebuild_ttl".to_string(),
                value: format!("{:?}", self.rebuild_ttl),
                reason: "rebuild_ttl must be positive".to_string(),
            }));
        }

        if self.sweep_interval.is_zero() {
            return Err(CivitasError::Config(ConfigError::InvalidValue {
                field: "sweep_interval".to_string(),
                value: format!("{:?}", self.sweep_interval),
                reason: "sweep_interval must be positive".to_string(),
            }));
        }

        Ok(())
    }
}
