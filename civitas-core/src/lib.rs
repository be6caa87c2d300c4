//! CIVITAS Core - Shared Vocabulary
//!
//! Error taxonomy, configuration, cache keys and TTL policy used by every
//! other crate in the workspace. This crate performs no I/O beyond reading
//! environment variables.

pub mod config;
pub mod constants;
pub mod error;
pub mod key;
pub mod ttl;

pub use config::{env_flag, env_or, CacheSettings};
pub use error::{
    CivitasError, CivitasResult, ComputeError, ConfigError, StorageError, SyncError,
};
pub use key::CacheKey;
pub use ttl::{TtlClass, TtlPolicy};

use chrono::{DateTime, Utc};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;
