//! CIVITAS API Server Entry Point
//!
//! Opens the LMDB cache, loads the record snapshot, arms the daily sync
//! scheduler and the expired-entry sweep, then serves HTTP until Ctrl-C.

use std::sync::Arc;

use civitas_api::telemetry::init_tracing;
use civitas_api::{
    create_router, ApiError, ApiResult, AppState, ReloadingPipeline, ServerConfig, SnapshotSource,
};
use civitas_core::CivitasError;
use civitas_storage::{AggregationCache, DurableCache, HotCache, LmdbCacheStore};
use civitas_sync::{cache_sweep_task, CacheBuilder, SweepMetrics, SyncScheduler};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> ApiResult<()> {
    let config = ServerConfig::from_env();
    init_tracing(config.api.log_format)?;
    config.validate()?;

    let store = LmdbCacheStore::new(&config.cache.path, config.cache.max_size_mb)
        .map_err(CivitasError::from)?;
    let durable = DurableCache::new(Arc::new(store));
    let mut cache = AggregationCache::new(durable.clone());
    if config.cache.hot_capacity > 0 {
        cache = cache.with_fast_layer(Arc::new(HotCache::new(config.cache.hot_capacity)));
    }

    let snapshot = Arc::new(SnapshotSource::empty(&config.api.snapshot_path));
    if let Err(e) = snapshot.reload().await {
        tracing::warn!(
            path = %config.api.snapshot_path.display(),
            error = %e,
            "Record snapshot not loaded, aggregates stay empty until the next import"
        );
    }

    let trigger = config.sync.trigger()?;
    let builder = Arc::new(CacheBuilder::new(
        snapshot.clone(),
        cache,
        config.cache.effective_ttl_policy(),
        trigger.timezone(),
    ));
    let pipeline = Arc::new(ReloadingPipeline::new(config.sync.pipeline(), Arc::clone(&snapshot)));
    let scheduler = Arc::new(
        SyncScheduler::new(trigger, pipeline, builder)
            .with_exclusive_runs(config.sync.exclusive_runs),
    );
    scheduler.start();

    if config.sync.rebuild_on_start {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move {
            if let Some(report) = scheduler.refresh_if_stale().await {
                tracing::info!(
                    succeeded = report.succeeded.len(),
                    failed = ?report.failed_keys(),
                    "Startup rebuild finished"
                );
            }
        });
    }

    let sweep_metrics = Arc::new(SweepMetrics::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweep = tokio::spawn(cache_sweep_task(
        durable,
        config.sweep.clone(),
        Arc::clone(&sweep_metrics),
        shutdown_rx,
    ));

    let state = AppState::new(Arc::clone(&scheduler), config.sweep.clone())
        .with_sweep_metrics(sweep_metrics);
    let app = create_router(state, &config.api.cors_origins);

    let addr = config.api.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;
    tracing::info!(%addr, "Starting CIVITAS API server");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown signal received");
        })
        .await
        .map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;

    scheduler.stop();
    if shutdown_tx.send(true).is_err() {
        tracing::debug!("Sweep task already stopped before shutdown signal");
    }
    if let Ok(metrics) = sweep.await {
        let snapshot = metrics.snapshot();
        tracing::info!(sweeps = snapshot.sweeps, removed = snapshot.entries_removed, "Shutdown complete");
    }
    Ok(())
}
