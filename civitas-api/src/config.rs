//! API Configuration Module
//!
//! Server-level settings: bind address, record snapshot location, log output
//! and CORS. Cache and sync settings live with their crates and are gathered
//! into [`ServerConfig`] here.

use std::net::SocketAddr;
use std::path::PathBuf;

use civitas_core::{env_flag, CacheSettings, CivitasResult, ConfigError};
use civitas_sync::{SweepConfig, SyncConfig};

/// Default listen address.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

/// Default location of the record snapshot written by the import pipeline.
pub const DEFAULT_SNAPSHOT_PATH: &str = "./data/records.json";

// ============================================================================
// API CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Listen address (`host:port`)
    pub bind_addr: String,
    /// JSON array of records produced by the import pipeline
    pub snapshot_path: PathBuf,
    pub log_format: LogFormat,
    /// Allowed CORS origins. Empty allows all origins.
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            snapshot_path: PathBuf::from(DEFAULT_SNAPSHOT_PATH),
            log_format: LogFormat::Pretty,
            cors_origins: Vec::new(),
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `CIVITAS_BIND_ADDR`: listen address (default: 0.0.0.0:3000)
    /// - `CIVITAS_SNAPSHOT_PATH`: record snapshot (default: ./data/records.json)
    /// - `CIVITAS_LOG_FORMAT`: `json` for JSON logs, anything else for pretty
    /// - `CIVITAS_CORS_ORIGINS`: comma-separated allowed origins (empty = all)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let cors_origins = std::env::var("CIVITAS_CORS_ORIGINS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            bind_addr: std::env::var("CIVITAS_BIND_ADDR").unwrap_or(defaults.bind_addr),
            snapshot_path: std::env::var("CIVITAS_SNAPSHOT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.snapshot_path),
            log_format: std::env::var("CIVITAS_LOG_FORMAT")
                .map(|f| LogFormat::parse(&f))
                .unwrap_or(defaults.log_format),
            cors_origins,
        }
    }

    pub fn socket_addr(&self) -> CivitasResult<SocketAddr> {
        self.bind_addr.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue {
                field: "bind_addr".to_string(),
                value: self.bind_addr.clone(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    pub fn validate(&self) -> CivitasResult<()> {
        self.socket_addr()?;
        if self.snapshot_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "snapshot_path".to_string(),
                value: String::new(),
                reason: "snapshot_path must not be empty".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

// ============================================================================
// SERVER CONFIGURATION
// ============================================================================

/// Everything the server binary needs.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub api: ApiConfig,
    pub cache: CacheSettings,
    pub sync: SyncConfig,
    pub sweep: SweepConfig,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let cache = CacheSettings::from_env();
        let sweep = SweepConfig {
            log_empty_sweeps: env_flag("CIVITAS_LOG_EMPTY_SWEEPS", false),
            ..SweepConfig::default()
        }
        .with_interval(cache.sweep_interval);

        Self {
            api: ApiConfig::from_env(),
            cache,
            sync: SyncConfig::from_env(),
            sweep,
        }
    }

    pub fn validate(&self) -> CivitasResult<()> {
        self.api.validate()?;
        self.cache.validate()?;
        self.sync.validate()
    }
}
