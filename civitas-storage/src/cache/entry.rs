//! Cache entries and their persisted envelope.
//!
//! # Envelope layout
//!
//! ```text
//! [format_version: u16 LE][expires_at millis: i64 LE][created_at millis: i64 LE][json value]
//! ```
//!
//! The expiry sits directly after the version so sweeps can decide whether to
//! drop an entry without parsing its payload.

use std::time::Duration;

use chrono::{DateTime, Utc};
use civitas_core::constants::CACHE_FORMAT_VERSION;
use civitas_core::StorageError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const VERSION_LEN: usize = 2;
const HEADER_LEN: usize = VERSION_LEN + 8 + 8;

/// A single cached value with its lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Create an entry that starts now.
    pub fn new(key: impl Into<String>, value: Value, ttl: Duration) -> Self {
        Self::new_at(key, value, ttl, Utc::now())
    }

    /// Create an entry created at an explicit instant.
    pub fn new_at(key: impl Into<String>, value: Value, ttl: Duration, now: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            value,
            created_at: now,
            expires_at: expiry_after(now, ttl),
        }
    }

    /// An entry may be served while `now <= expires_at`.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at
    }

    /// Sweeps remove entries with `expires_at < now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Lifetime left at `now`, zero once expired.
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// `now + ttl`, saturating at the maximum representable instant.
pub fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Serialize an entry into its persisted envelope.
pub fn encode_entry(entry: &CacheEntry) -> Result<Vec<u8>, StorageError> {
    let payload = serde_json::to_vec(&entry.value).map_err(|e| StorageError::Serialization {
        reason: e.to_string(),
    })?;

    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(&CACHE_FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&entry.expires_at.timestamp_millis().to_le_bytes());
    bytes.extend_from_slice(&entry.created_at.timestamp_millis().to_le_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Decode a persisted envelope.
///
/// Envelopes written under a different format version fail with
/// [`StorageError::UnsupportedFormat`], damaged ones with
/// [`StorageError::CorruptEntry`]. Both are [`StorageError::is_undecodable`].
pub fn decode_entry(key: &str, bytes: &[u8]) -> Result<CacheEntry, StorageError> {
    let Some(version) = read_version(bytes) else {
        return Err(corrupt(key, "missing version tag"));
    };
    if version != CACHE_FORMAT_VERSION {
        return Err(StorageError::UnsupportedFormat {
            key: key.to_string(),
            version,
        });
    }
    if bytes.len() < HEADER_LEN {
        return Err(corrupt(key, "truncated header"));
    }

    let expires_at = read_millis(bytes, VERSION_LEN).ok_or_else(|| corrupt(key, "bad expiry"))?;
    let created_at =
        read_millis(bytes, VERSION_LEN + 8).ok_or_else(|| corrupt(key, "bad creation time"))?;
    let value: Value = serde_json::from_slice(&bytes[HEADER_LEN..])
        .map_err(|e| corrupt(key, &e.to_string()))?;

    Ok(CacheEntry {
        key: key.to_string(),
        value,
        created_at,
        expires_at,
    })
}

/// Expiry of a persisted envelope without decoding the payload.
///
/// `None` means the envelope is unreadable under the current format.
pub fn peek_expires_at(bytes: &[u8]) -> Option<DateTime<Utc>> {
    if read_version(bytes)? != CACHE_FORMAT_VERSION || bytes.len() < HEADER_LEN {
        return None;
    }
    read_millis(bytes, VERSION_LEN)
}

fn read_version(bytes: &[u8]) -> Option<u16> {
    let raw: [u8; VERSION_LEN] = bytes.get(..VERSION_LEN)?.try_into().ok()?;
    Some(u16::from_le_bytes(raw))
}

fn read_millis(bytes: &[u8], offset: usize) -> Option<DateTime<Utc>> {
    let raw: [u8; 8] = bytes.get(offset..offset + 8)?.try_into().ok()?;
    DateTime::from_timestamp_millis(i64::from_le_bytes(raw))
}

fn corrupt(key: &str, reason: &str) -> StorageError {
    StorageError::CorruptEntry {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}
