//! Error types for CIVITAS operations

use thiserror::Error;

/// Cache storage errors.
///
/// These are produced by the fallible `CacheStore` backends. The durable cache
/// wrapper swallows them (miss / no-op) after logging and counting them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Corrupt entry for key {key}: {reason}")]
    CorruptEntry { key: String, reason: String },

    #[error("Entry for key {key} uses unsupported format version {version}")]
    UnsupportedFormat { key: String, version: u16 },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    /// The stored bytes exist but can never be read back under this format.
    pub fn is_undecodable(&self) -> bool {
        matches!(self, Self::CorruptEntry { .. } | Self::UnsupportedFormat { .. })
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config file {path}: {reason}")]
    Parse { path: String, reason: String },
}

/// Errors raised while computing an aggregate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ComputeError {
    #[error("Aggregate query {query} failed: {reason}")]
    QueryFailed { query: String, reason: String },

    #[error("Unknown aggregate key: {key}")]
    UnknownKey { key: String },

    #[error("Aggregate value for {key} could not be serialized: {reason}")]
    Serialization { key: String, reason: String },
}

/// Errors raised by the import + rebuild sequence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("Import pipeline could not be started ({program}): {reason}")]
    ImportSpawn { program: String, reason: String },

    #[error("Import pipeline exited with status {code:?}")]
    ImportFailed { code: Option<i32> },

    #[error("Cache rebuild incomplete, failed keys: {failed:?}")]
    RebuildIncomplete { failed: Vec<String> },

    #[error("A sync run is already in progress")]
    AlreadyRunning,
}

/// Master error type for all CIVITAS errors.
#[derive(Debug, Clone, Error)]
pub enum CivitasError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Compute error: {0}")]
    Compute(#[from] ComputeError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),
}

/// Result type alias for CIVITAS operations.
pub type CivitasResult<T> = Result<T, CivitasError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_corrupt_entry() {
        let err = StorageError::CorruptEntry {
            key: "summary".to_string(),
            reason: "truncated header".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Corrupt entry"));
        assert!(msg.contains("summary"));
        assert!(msg.contains("truncated header"));
    }

    #[test]
    fn test_undecodable_variants() {
        let foreign = StorageError::UnsupportedFormat {
            key: "summary".to_string(),
            version: 99,
        };
        assert!(foreign.is_undecodable());
        assert!(format!("{}", foreign).contains("99"));
        assert!(StorageError::CorruptEntry {
            key: "k".to_string(),
            reason: "bad expiry".to_string(),
        }
        .is_undecodable());
        assert!(!StorageError::LockPoisoned.is_undecodable());
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "max_concurrent".to_string(),
            value: "0".to_string(),
            reason: "must be at least 1".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("max_concurrent"));
        assert!(msg.contains("0"));
        assert!(msg.contains("must be at least 1"));
    }

    #[test]
    fn test_sync_error_display_import_failed() {
        let err = SyncError::ImportFailed { code: Some(3) };
        assert!(format!("{}", err).contains("Some(3)"));
    }

    #[test]
    fn test_sync_error_display_rebuild_incomplete() {
        let err = SyncError::RebuildIncomplete {
            failed: vec!["by-theme".to_string()],
        };
        let msg = format!("{}", err);
        assert!(msg.contains("rebuild incomplete"));
        assert!(msg.contains("by-theme"));
    }

    #[test]
    fn test_civitas_error_from_variants() {
        let storage = CivitasError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, CivitasError::Storage(_)));

        let config = CivitasError::from(ConfigError::MissingRequired {
            field: "cache_path".to_string(),
        });
        assert!(matches!(config, CivitasError::Config(_)));

        let compute = CivitasError::from(ComputeError::UnknownKey {
            key: "nope".to_string(),
        });
        assert!(matches!(compute, CivitasError::Compute(_)));

        let sync = CivitasError::from(SyncError::AlreadyRunning);
        assert!(matches!(sync, CivitasError::Sync(_)));
    }
}
