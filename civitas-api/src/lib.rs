//! CIVITAS API - HTTP Surface
//!
//! Serves the precomputed dashboard aggregates over REST (Axum) and exposes
//! cache maintenance and sync controls. Aggregates are answered from the
//! aggregation cache and built on a miss from the record snapshot written by
//! the import pipeline.

pub mod config;
pub mod error;
pub mod routes;
pub mod snapshot;
pub mod state;
pub mod telemetry;

pub use config::{ApiConfig, LogFormat, ServerConfig};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use routes::create_router;
pub use snapshot::{ReloadingPipeline, SnapshotSource};
pub use state::AppState;
