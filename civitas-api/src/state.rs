//! Shared application state for Axum routers.

use std::sync::Arc;
use std::time::Instant;

use civitas_storage::AggregationCache;
use civitas_sync::{CacheBuilder, SweepConfig, SweepMetrics, SyncScheduler};

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Builder for the fixed aggregate keys; owns the aggregation cache.
    pub builder: Arc<CacheBuilder>,
    pub scheduler: Arc<SyncScheduler>,
    pub sweep: SweepConfig,
    /// Sweep counters, shared with the background sweep task.
    pub sweep_metrics: Arc<SweepMetrics>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(scheduler: Arc<SyncScheduler>, sweep: SweepConfig) -> Self {
        Self {
            builder: Arc::clone(scheduler.builder()),
            scheduler,
            sweep,
            sweep_metrics: Arc::new(SweepMetrics::new()),
            start_time: Instant::now(),
        }
    }

    /// Report into `metrics`, the handle the background sweep task writes to.
    pub fn with_sweep_metrics(mut self, metrics: Arc<SweepMetrics>) -> Self {
        self.sweep_metrics = metrics;
        self
    }

    pub fn cache(&self) -> &AggregationCache {
        self.builder.cache()
    }
}
