//! Expired Entry Sweep Background Task
//!
//! Reads already skip expired entries, and a read of an expired key removes
//! it. Keys nobody reads again would stay on disk forever, so this task
//! periodically deletes every expired entry from the durable store.
//!
//! ```ignore
//! let metrics = Arc::new(SweepMetrics::new());
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let handle = tokio::spawn(cache_sweep_task(
//!     cache.clone(),
//!     SweepConfig::default(),
//!     Arc::clone(&metrics),
//!     shutdown_rx,
//! ));
//!
//! // Later
//! if shutdown_tx.send(true).is_err() {
//!     tracing::debug!("Sweep task already gone");
//! }
//! handle.await?;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use civitas_core::constants::DEFAULT_SWEEP_INTERVAL_SECS;
use civitas_core::env_or;
use civitas_storage::DurableCache;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Time between sweeps (default: 10 minutes)
    pub interval: Duration,
    /// Log sweeps that removed nothing (default: false)
    pub log_empty_sweeps: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            log_empty_sweeps: false,
        }
    }
}

impl SweepConfig {
    /// # Environment Variables
    /// - `CIVITAS_SWEEP_INTERVAL_SECS`: sweep interval (default: 600)
    pub fn from_env() -> Self {
        Self {
            interval: Duration::from_secs(env_or(
                "CIVITAS_SWEEP_INTERVAL_SECS",
                DEFAULT_SWEEP_INTERVAL_SECS,
            )),
            ..Self::default()
        }
    }

    pub fn development() -> Self {
        Self {
            interval: Duration::from_secs(30),
            log_empty_sweeps: true,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

// ============================================================================
// METRICS
// ============================================================================

#[derive(Debug, Default)]
pub struct SweepMetrics {
    /// Sweeps completed
    pub sweeps: AtomicU64,
    /// Expired entries removed since startup
    pub entries_removed: AtomicU64,
}

impl SweepMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SweepSnapshot {
        SweepSnapshot {
            sweeps: self.sweeps.load(Ordering::Relaxed),
            entries_removed: self.entries_removed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepSnapshot {
    pub sweeps: u64,
    pub entries_removed: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Sweep expired entries every `config.interval` until `shutdown_rx` turns
/// true. The first sweep runs immediately.
///
/// `metrics` is shared with whoever reports sweep counts, so pass the same
/// handle the status endpoint reads.
pub async fn cache_sweep_task(
    cache: DurableCache,
    config: SweepConfig,
    metrics: Arc<SweepMetrics>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<SweepMetrics> {
    let mut ticker = interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        interval_secs = config.interval.as_secs(),
        "Cache sweep task started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Cache sweep task shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                sweep_once(&cache, &config, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        sweeps = snapshot.sweeps,
        entries_removed = snapshot.entries_removed,
        "Cache sweep task completed"
    );

    metrics
}

/// One sweep. Returns the number of entries removed.
pub async fn sweep_once(cache: &DurableCache, config: &SweepConfig, metrics: &SweepMetrics) -> u64 {
    let removed = cache.delete_expired().await;
    metrics.sweeps.fetch_add(1, Ordering::Relaxed);
    metrics.entries_removed.fetch_add(removed, Ordering::Relaxed);

    if removed > 0 {
        tracing::info!(removed, "Expired cache entries swept");
    } else if config.log_empty_sweeps {
        tracing::debug!("Cache sweep found no expired entries");
    }
    removed
}
