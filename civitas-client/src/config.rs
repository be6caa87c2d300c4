//! Client configuration.
//!
//! Loaded from environment variables or a TOML file. Every field has a
//! default, so a file only needs the values it changes:
//!
//! ```toml
//! base_url = "http://localhost:3000"
//! max_concurrent = 4
//!
//! [[endpoint_timeouts]]
//! prefix = "/api/reports"
//! timeout_ms = 90000
//! ```

use std::path::Path;
use std::time::Duration;

use civitas_core::constants::{
    DEFAULT_HOT_CACHE_CAPACITY, DEFAULT_MAX_CONCURRENT_REQUESTS, DEFAULT_MAX_RETRIES,
    DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_RETRY_BASE_DELAY_MS, DEFAULT_RETRY_JITTER_RATIO,
    DEFAULT_RETRY_MAX_DELAY_MS,
};
use civitas_core::{env_or, CivitasResult, ConfigError};
use serde::{Deserialize, Serialize};

use crate::backoff::BackoffPolicy;

/// Timeout override for endpoints starting with `prefix`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointTimeout {
    pub prefix: String,
    pub timeout_ms: u64,
}

impl EndpointTimeout {
    pub fn new(prefix: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            prefix: prefix.into(),
            timeout_ms,
        }
    }
}

/// Per-endpoint timeouts applied when a caller gives none. Light endpoints
/// fail fast; heavy aggregations get longer.
pub fn default_endpoint_timeouts() -> Vec<EndpointTimeout> {
    vec![
        EndpointTimeout::new("/api/summary", 10_000),
        EndpointTimeout::new("/api/distinct", 10_000),
        EndpointTimeout::new("/api/health", 5_000),
        EndpointTimeout::new("/api/dashboard-data", 45_000),
        EndpointTimeout::new("/api/aggregate", 30_000),
        EndpointTimeout::new("/api/stats", 40_000),
        EndpointTimeout::new("/api/sla", 45_000),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Prefix joined with every endpoint by the HTTP transport
    pub base_url: String,
    /// Maximum requests executing at once
    pub max_concurrent: usize,
    /// Per-attempt timeout for endpoints without an override
    pub request_timeout_ms: u64,
    /// Retries after the first attempt
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Jitter as a fraction of the exponential delay
    pub retry_jitter: f64,
    /// Entry capacity of the client-side result cache
    pub cache_capacity: usize,
    pub endpoint_timeouts: Vec<EndpointTimeout>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            max_concurrent: DEFAULT_MAX_CONCURRENT_REQUESTS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            retry_jitter: DEFAULT_RETRY_JITTER_RATIO,
            cache_capacity: DEFAULT_HOT_CACHE_CAPACITY,
            endpoint_timeouts: default_endpoint_timeouts(),
        }
    }
}

impl ClientConfig {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `CIVITAS_API_URL`: base URL (default: http://localhost:3000)
    /// - `CIVITAS_MAX_CONCURRENT_REQUESTS`: concurrency bound (default: 6)
    /// - `CIVITAS_REQUEST_TIMEOUT_MS`: fallback timeout (default: 60000)
    /// - `CIVITAS_MAX_RETRIES`: retries after the first attempt (default: 2)
    /// - `CIVITAS_RETRY_BASE_DELAY_MS`: backoff base (default: 2000)
    /// - `CIVITAS_RETRY_MAX_DELAY_MS`: backoff cap (default: 30000)
    /// - `CIVITAS_RETRY_JITTER`: jitter ratio (default: 0.5)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("CIVITAS_API_URL").unwrap_or(defaults.base_url),
            max_concurrent: env_or("CIVITAS_MAX_CONCURRENT_REQUESTS", defaults.max_concurrent),
            request_timeout_ms: env_or("CIVITAS_REQUEST_TIMEOUT_MS", defaults.request_timeout_ms),
            max_retries: env_or("CIVITAS_MAX_RETRIES", defaults.max_retries),
            retry_base_delay_ms: env_or("CIVITAS_RETRY_BASE_DELAY_MS", defaults.retry_base_delay_ms),
            retry_max_delay_ms: env_or("CIVITAS_RETRY_MAX_DELAY_MS", defaults.retry_max_delay_ms),
            retry_jitter: env_or("CIVITAS_RETRY_JITTER", defaults.retry_jitter),
            cache_capacity: defaults.cache_capacity,
            endpoint_timeouts: defaults.endpoint_timeouts,
        }
    }

    /// Load and validate a TOML file.
    pub fn load(path: &Path) -> CivitasResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config: ClientConfig = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Fast retries for tests and local work.
    pub fn development() -> Self {
        Self {
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 1_000,
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, base_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay_ms = base_delay_ms;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
            self.retry_jitter,
        )
    }

    /// Timeout for `endpoint`: the first matching prefix override, else the
    /// general request timeout.
    pub fn timeout_for(&self, endpoint: &str) -> Duration {
        let ms = self
            .endpoint_timeouts
            .iter()
            .find(|t| endpoint.starts_with(&t.prefix))
            .map(|t| t.timeout_ms)
            .unwrap_or(self.request_timeout_ms);
        Duration::from_millis(ms)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - max_concurrent > 0
    /// - request timeout and every override > 0
    /// - retry_max_delay_ms >= retry_base_delay_ms
    /// - retry_jitter within [0, 1]
    pub fn validate(&self) -> CivitasResult<()> {
        if self.max_concurrent == 0 {
            return Err(invalid("max_concurrent", self.max_concurrent, "must be at least 1"));
        }
        if self.request_timeout_ms == 0 {
            return Err(invalid("request_timeout_ms", self.request_timeout_ms, "must be > 0"));
        }
        if let Some(t) = self.endpoint_timeouts.iter().find(|t| t.timeout_ms == 0) {
            return Err(invalid("endpoint_timeouts", &t.prefix, "timeout_ms must be > 0"));
        }
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(invalid(
                "retry_max_delay_ms",
                self.retry_max_delay_ms,
                "must not be below retry_base_delay_ms",
            ));
        }
        if !(0.0..=1.0).contains(&self.retry_jitter) {
            return Err(invalid("retry_jitter", self.retry_jitter, "must be within [0, 1]"));
        }
        Ok(())
    }
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> civitas_core::CivitasError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
    .into()
}
