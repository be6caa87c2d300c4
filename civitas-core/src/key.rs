//! Cache key construction.
//!
//! Server-side cache entries and client-side in-flight records share one key
//! rule, so a key produced here identifies the same payload everywhere:
//!
//! - bare endpoint keys (`summary`, `/api/aggregate/by-month`)
//! - parameterized keys `endpoint:hash8:version`, where `hash8` is the first
//!   eight hex characters of the SHA-256 of the normalized parameter set

use crate::constants::{DEFAULT_KEY_VERSION, KEY_HASH_LEN};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of a cache entry or an in-flight request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for an endpoint without parameters.
    pub fn endpoint(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Key for an endpoint plus a parameter set, using the default version tag.
    pub fn with_params(endpoint: &str, params: &Map<String, Value>) -> Self {
        Self::versioned(endpoint, params, DEFAULT_KEY_VERSION)
    }

    /// Key for an endpoint plus a parameter set under an explicit version tag.
    ///
    /// Parameter order never changes the key. Null values are dropped and
    /// nested objects are folded into their JSON text before hashing.
    pub fn versioned(endpoint: &str, params: &Map<String, Value>, version: &str) -> Self {
        let digest = Sha256::digest(normalize_params(params).as_bytes());
        let hash = hex::encode(digest);
        Self(format!("{}:{}:{}", endpoint, &hash[..KEY_HASH_LEN], version))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The endpoint portion of the key (everything before the first `:`).
    pub fn endpoint_part(&self) -> &str {
        self.0.split(':').next().unwrap_or(&self.0)
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Canonical JSON text for a parameter set.
fn normalize_params(params: &Map<String, Value>) -> String {
    let normalized: BTreeMap<&str, Value> = params
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let v = match v {
                Value::Object(_) => Value::String(v.to_string()),
                other => other.clone(),
            };
            (k.as_str(), v)
        })
        .collect();
    // A BTreeMap of JSON values always serializes
    serde_json::to_string(&normalized).unwrap_or_default()
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_endpoint_key_is_verbatim() {
        let key = CacheKey::endpoint("by-month");
        assert_eq!(key.as_str(), "by-month");
        assert_eq!(key.endpoint_part(), "by-month");
    }

    #[test]
    fn test_param_key_format() {
        let key = CacheKey::with_params("overview", &params(json!({"orgao": "SEMAD"})));
        let parts: Vec<&str> = key.as_str().split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "overview");
        assert_eq!(parts[1].len(), KEY_HASH_LEN);
        assert!(parts[1].chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(parts[2], "v1");
        assert_eq!(key.endpoint_part(), "overview");
    }

    #[test]
    fn test_null_params_are_ignored() {
        let a = CacheKey::with_params("status", &params(json!({"tema": "Saúde"})));
        let b = CacheKey::with_params("status", &params(json!({"tema": "Saúde", "bairro": null})));
        assert_eq!(a, b);
    }

    #[test]
    fn test_version_changes_key() {
        let p = params(json!({"tema": "Saúde"}));
        assert_ne!(
            CacheKey::versioned("status", &p, "v1"),
            CacheKey::versioned("status", &p, "v2")
        );
    }

    #[test]
    fn test_different_params_differ() {
        let a = CacheKey::with_params("status", &params(json!({"tema": "Saúde"})));
        let b = CacheKey::with_params("status", &params(json!({"tema": "Educação"})));
        assert_ne!(a, b);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_param_order_does_not_change_key(
            pairs in proptest::collection::btree_map("[a-z]{1,8}", "[a-zA-Z0-9 ]{0,12}", 0..6)
        ) {
            let forward: Map<String, Value> = pairs
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            let reverse: Map<String, Value> = pairs
                .iter()
                .rev()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();

            prop_assert_eq!(
                CacheKey::with_params("overview", &forward),
                CacheKey::with_params("overview", &reverse)
            );
        }

        #[test]
        fn prop_endpoint_part_roundtrips(endpoint in "[a-z][a-z\\-/]{0,20}") {
            let key = CacheKey::with_params(&endpoint, &Map::new());
            prop_assert_eq!(key.endpoint_part(), endpoint.as_str());
        }
    }
}
