//! REST API Routes
//!
//! - `GET  /health/ping`                   liveness
//! - `GET  /api/aggregate/:key`            cached aggregate, built on a miss
//! - `GET  /api/cache/status`              durable store and fast layer stats
//! - `POST /api/cache/clear`               drop every cached entry
//! - `POST /api/cache/sweep`               delete expired entries now
//! - `POST /api/cache/invalidate?prefix=`  drop keys under a prefix
//! - `POST /api/cache/rebuild`             rebuild every aggregate, no import
//! - `GET  /api/sync/status`               scheduler state
//! - `POST /api/sync/run`                  import + rebuild now

use axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use civitas_storage::{CacheSource, CacheStats, CacheStatus};
use civitas_sync::{
    sweep_once, AggregateKey, BuildReport, SchedulerStatus, SweepSnapshot, SyncMetricsSnapshot,
    SyncRun,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct AggregateResponse {
    pub key: String,
    pub source: CacheSource,
    pub cached_at: DateTime<Utc>,
    /// Lifetime the key's class is written with
    pub ttl_seconds: u64,
    pub data: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatusResponse {
    pub durable: CacheStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fast_layer: Option<CacheStats>,
    pub sweeps: SweepSnapshot,
    pub last_build_at: Option<DateTime<Utc>>,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemovedResponse {
    pub removed: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvalidateParams {
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatusResponse {
    pub scheduler: SchedulerStatus,
    pub metrics: SyncMetricsSnapshot,
}

// ============================================================================
// HANDLERS
// ============================================================================

pub async fn ping() -> impl IntoResponse {
    (StatusCode::OK, "pong")
}

pub async fn get_aggregate(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<AggregateResponse>> {
    let aggregate = AggregateKey::parse(&key).ok_or_else(|| ApiError::unknown_aggregate(&key))?;
    let read = state.builder.get_or_build(aggregate).await?;

    Ok(Json(AggregateResponse {
        key: aggregate.as_str().to_string(),
        source: read.source(),
        cached_at: read.cached_at(),
        ttl_seconds: state.builder.ttl_for(aggregate).as_secs(),
        data: read.into_value(),
    }))
}

pub async fn cache_status(State(state): State<AppState>) -> Json<CacheStatusResponse> {
    let cache = state.cache();
    Json(CacheStatusResponse {
        durable: cache.durable().status().await,
        fast_layer: cache.fast_layer().map(|fast| fast.stats()),
        sweeps: state.sweep_metrics.snapshot(),
        last_build_at: state.builder.last_build_at().await,
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

pub async fn clear_cache(State(state): State<AppState>) -> Json<RemovedResponse> {
    let removed = state.cache().clear().await;
    tracing::info!(removed, "Cache cleared over HTTP");
    Json(RemovedResponse { removed })
}

pub async fn sweep_cache(State(state): State<AppState>) -> Json<RemovedResponse> {
    let removed = sweep_once(state.cache().durable(), &state.sweep, &state.sweep_metrics).await;
    Json(RemovedResponse { removed })
}

pub async fn invalidate_prefix(
    State(state): State<AppState>,
    Query(params): Query<InvalidateParams>,
) -> ApiResult<Json<RemovedResponse>> {
    let prefix = params
        .prefix
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::invalid_input("Query parameter 'prefix' is required"))?;

    let removed = state.cache().invalidate_prefix(&prefix).await;
    tracing::info!(prefix = %prefix, removed, "Cache prefix invalidated");
    Ok(Json(RemovedResponse { removed }))
}

pub async fn rebuild_cache(State(state): State<AppState>) -> Json<BuildReport> {
    Json(state.builder.build().await)
}

pub async fn sync_status(State(state): State<AppState>) -> Json<SyncStatusResponse> {
    Json(SyncStatusResponse {
        scheduler: state.scheduler.status(),
        metrics: state.scheduler.metrics(),
    })
}

pub async fn sync_run(State(state): State<AppState>) -> ApiResult<Json<SyncRun>> {
    Ok(Json(state.scheduler.run_once().await?))
}

// ============================================================================
// ROUTER
// ============================================================================

/// Build the full router. An empty `cors_origins` allows every origin.
pub fn create_router(state: AppState, cors_origins: &[String]) -> Router {
    let health = Router::new().route("/ping", get(ping));

    let api = Router::new()
        .route("/aggregate/:key", get(get_aggregate))
        .route("/cache/status", get(cache_status))
        .route("/cache/clear", post(clear_cache))
        .route("/cache/sweep", post(sweep_cache))
        .route("/cache/invalidate", post(invalidate_prefix))
        .route("/cache/rebuild", post(rebuild_cache))
        .route("/sync/status", get(sync_status))
        .route("/sync/run", post(sync_run))
        .with_state(state);

    Router::new()
        .nest("/health", health)
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(cors_origins))
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods([Method::GET, Method::POST, Method::OPTIONS]);

    if origins.is_empty() {
        tracing::info!("CORS: allowing all origins");
        cors.allow_origin(Any).allow_headers(Any)
    } else {
        tracing::info!(origins = ?origins, "CORS: restricting origins");
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        cors.allow_origin(allowed).allow_headers(Any)
    }
}
