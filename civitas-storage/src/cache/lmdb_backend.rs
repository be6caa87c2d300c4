//! LMDB-backed cache store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep cache entries in a
//! memory-mapped file so warm aggregates survive process restarts and can be
//! shared by every process that opens the same directory.
//!
//! # Transactions
//!
//! - `get` runs in a read transaction and reports envelopes it cannot decode
//!   as an undecodable [`StorageError`]
//! - `put`, `delete` and the sweeps each run in one write transaction, which
//!   gives the atomic upsert-by-key the store contract requires

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use civitas_core::{CivitasError, CivitasResult, StorageError};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use super::entry::{decode_entry, encode_entry, peek_expires_at, CacheEntry};
use super::traits::{CacheStore, StoreStats};

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convert LmdbCacheError to CivitasError.
impl From<LmdbCacheError> for CivitasError {
    fn from(e: LmdbCacheError) -> Self {
        match e {
            LmdbCacheError::Transaction(reason) => {
                CivitasError::Storage(StorageError::TransactionFailed { reason })
            }
            other => CivitasError::Storage(StorageError::Unavailable {
                reason: other.to_string(),
            }),
        }
    }
}

fn txn_err(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

/// LMDB-backed cache store.
///
/// # Example
///
/// ```ignore
/// use civitas_storage::cache::{CacheEntry, CacheStore, LmdbCacheStore};
///
/// let store = LmdbCacheStore::new("/var/lib/civitas/cache", 256)?;
/// store.put(CacheEntry::new("summary", value, Duration::from_secs(3600))).await?;
/// let entry = store.get("summary").await?;
/// ```
pub struct LmdbCacheStore {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    /// Directory the environment lives in.
    path: PathBuf,
}

impl LmdbCacheStore {
    /// Open (or create) a cache store.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per store and the directory is
        // not opened twice within this process through another handle.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;

        wtxn.commit().map_err(txn_err)?;

        tracing::debug!(path = %path.as_ref().display(), max_size_mb, "LMDB cache store opened");

        Ok(Self {
            env,
            db,
            path: path.as_ref().to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete every key selected by `select` in a single write transaction.
    fn delete_where<F>(&self, mut select: F) -> Result<u64, LmdbCacheError>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let doomed: Vec<Vec<u8>> = {
            let iter = self.db.iter(&wtxn).map_err(txn_err)?;
            let mut keys = Vec::new();
            for result in iter {
                let (key, value) = result.map_err(txn_err)?;
                if select(key, value) {
                    keys.push(key.to_vec());
                }
            }
            keys
        };

        let mut deleted = 0u64;
        for key in &doomed {
            if self.db.delete(&mut wtxn, key).map_err(txn_err)? {
                deleted += 1;
            }
        }

        wtxn.commit().map_err(txn_err)?;
        Ok(deleted)
    }
}

#[async_trait]
impl CacheStore for LmdbCacheStore {
    fn name(&self) -> &'static str {
        "lmdb"
    }

    async fn get(&self, key: &str) -> CivitasResult<Option<CacheEntry>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;

        match self.db.get(&rtxn, key.as_bytes()).map_err(txn_err)? {
            Some(bytes) => Ok(Some(decode_entry(key, bytes)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, entry: CacheEntry) -> CivitasResult<()> {
        let bytes = encode_entry(&entry)?;

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.db
            .put(&mut wtxn, entry.key.as_bytes(), &bytes)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> CivitasResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let deleted = self.db.delete(&mut wtxn, key.as_bytes()).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(deleted)
    }

    async fn evict_if_expired(&self, key: &str, now: DateTime<Utc>) -> CivitasResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let expired = match self.db.get(&wtxn, key.as_bytes()).map_err(txn_err)? {
            Some(bytes) => peek_expires_at(bytes).map_or(true, |expires_at| expires_at < now),
            None => false,
        };

        let deleted = expired && self.db.delete(&mut wtxn, key.as_bytes()).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(deleted)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> CivitasResult<u64> {
        Ok(self.delete_where(|_, value| {
            peek_expires_at(value).map_or(true, |expires_at| expires_at < now)
        })?)
    }

    async fn delete_prefix(&self, prefix: &str) -> CivitasResult<u64> {
        let prefix = prefix.as_bytes();
        Ok(self.delete_where(|key, _| key.starts_with(prefix))?)
    }

    async fn clear(&self) -> CivitasResult<u64> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let count = self.db.len(&wtxn).map_err(txn_err)?;
        self.db.clear(&mut wtxn).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(count)
    }

    async fn stats(&self, now: DateTime<Utc>) -> CivitasResult<StoreStats> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;

        let mut stats = StoreStats::default();
        for result in self.db.iter(&rtxn).map_err(txn_err)? {
            let (key, value) = result.map_err(txn_err)?;
            stats.total += 1;
            stats.approx_bytes += (key.len() + value.len()) as u64;
            if peek_expires_at(value).map_or(true, |expires_at| expires_at < now) {
                stats.expired += 1;
            }
        }

        Ok(stats)
    }
}
