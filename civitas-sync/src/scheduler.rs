//! Sync Scheduler
//!
//! Runs the import pipeline followed by a full cache rebuild once a day at a
//! fixed wall-clock time. The schedule lives only in this process: starting
//! twice is a no-op and a restart re-arms it from the current time.
//!
//! ```text
//! Idle --start()--> Scheduled --trigger--> Running --done--> Scheduled
//!  ^                    |
//!  +------stop()--------+
//! ```
//!
//! A scheduled firing runs in its own task, so `stop()` never interrupts a
//! run already in progress. `run_once()` is independent of the schedule and,
//! unless exclusive runs are enabled, may overlap a scheduled firing.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use civitas_core::{CivitasResult, SyncError};
use serde::Serialize;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::builder::{BuildReport, CacheBuilder};
use crate::import::ImportPipeline;
use crate::trigger::DailyTrigger;

/// Longest single sleep while waiting for the trigger. Re-checking the wall
/// clock keeps the timer honest across suspend and clock changes.
const MAX_SLEEP_SLICE: Duration = Duration::from_secs(3600);

// ============================================================================
// STATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerPhase {
    Idle,
    Scheduled,
    Running,
}

/// Result of the most recent run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RunOutcome {
    Success { run_id: Uuid },
    Failure { run_id: Uuid, reason: String },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success { .. })
    }
}

/// A completed import + rebuild.
#[derive(Debug, Clone, Serialize)]
pub struct SyncRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub report: BuildReport,
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub phase: SchedulerPhase,
    pub scheduled: bool,
    pub running: bool,
    pub description: String,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<RunOutcome>,
    pub runs: u64,
    pub failures: u64,
}

#[derive(Debug, Default)]
struct State {
    timer: Option<JoinHandle<()>>,
    next_run_at: Option<DateTime<Utc>>,
    last_run_at: Option<DateTime<Utc>>,
    last_outcome: Option<RunOutcome>,
}

// ============================================================================
// METRICS
// ============================================================================

#[derive(Debug, Default)]
pub struct SyncMetrics {
    /// Runs finished, successful or not
    pub runs: AtomicU64,
    /// Runs that ended in failure
    pub failures: AtomicU64,
    pub import_failures: AtomicU64,
    pub rebuild_failures: AtomicU64,
    /// Runs rejected because another one was in progress
    pub rejected: AtomicU64,
}

impl SyncMetrics {
    pub fn snapshot(&self) -> SyncMetricsSnapshot {
        SyncMetricsSnapshot {
            runs: self.runs.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            import_failures: self.import_failures.load(Ordering::Relaxed),
            rebuild_failures: self.rebuild_failures.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncMetricsSnapshot {
    pub runs: u64,
    pub failures: u64,
    pub import_failures: u64,
    pub rebuild_failures: u64,
    pub rejected: u64,
}

// ============================================================================
// SCHEDULER
// ============================================================================

struct Inner {
    trigger: DailyTrigger,
    pipeline: Arc<dyn ImportPipeline>,
    builder: Arc<CacheBuilder>,
    exclusive: bool,
    running: AtomicUsize,
    state: Mutex<State>,
    metrics: SyncMetrics,
}

/// Decrements the running counter when a run ends, however it ends.
struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self) -> CivitasResult<RunningGuard<'_>> {
        if self.exclusive {
            if self
                .running
                .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                self.metrics.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(SyncError::AlreadyRunning.into());
            }
        } else {
            self.running.fetch_add(1, Ordering::SeqCst);
        }
        Ok(RunningGuard(&self.running))
    }

    async fn run(&self) -> CivitasResult<SyncRun> {
        let _guard = self.enter()?;
        let run_id = Uuid::now_v7();
        let started_at = Utc::now();
        tracing::info!(%run_id, import = %self.pipeline.describe(), "Sync run started");

        if let Err(e) = self.pipeline.run().await {
            self.metrics.import_failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!(%run_id, error = %e, "Import failed, cache rebuild skipped");
            self.finish(RunOutcome::Failure {
                run_id,
                reason: e.to_string(),
            });
            return Err(e);
        }

        let report = self.builder.build().await;
        if !report.is_complete() {
            self.metrics.rebuild_failures.fetch_add(1, Ordering::Relaxed);
            let err = SyncError::RebuildIncomplete {
                failed: report.failed_keys(),
            };
            tracing::error!(%run_id, error = %err, "Sync run failed");
            self.finish(RunOutcome::Failure {
                run_id,
                reason: err.to_string(),
            });
            return Err(err.into());
        }

        let finished_at = self.finish(RunOutcome::Success { run_id });
        tracing::info!(
            %run_id,
            keys = report.succeeded.len(),
            duration_ms = (finished_at - started_at).num_milliseconds(),
            "Sync run finished"
        );
        Ok(SyncRun {
            run_id,
            started_at,
            finished_at,
            report,
        })
    }

    fn finish(&self, outcome: RunOutcome) -> DateTime<Utc> {
        let now = Utc::now();
        self.metrics.runs.fetch_add(1, Ordering::Relaxed);
        if !outcome.is_success() {
            self.metrics.failures.fetch_add(1, Ordering::Relaxed);
        }
        let mut state = self.state();
        state.last_run_at = Some(now);
        state.last_outcome = Some(outcome);
        now
    }
}

/// Daily import + rebuild scheduler.
///
/// Dropping the scheduler cancels its timer.
pub struct SyncScheduler {
    inner: Arc<Inner>,
}

impl SyncScheduler {
    pub fn new(trigger: DailyTrigger, pipeline: Arc<dyn ImportPipeline>, builder: Arc<CacheBuilder>) -> Self {
        Self {
            inner: Arc::new(Inner {
                trigger,
                pipeline,
                builder,
                exclusive: false,
                running: AtomicUsize::new(0),
                state: Mutex::new(State::default()),
                metrics: SyncMetrics::default(),
            }),
        }
    }

    /// Reject overlapping runs with [`SyncError::AlreadyRunning`].
    ///
    /// Must be called before the scheduler is shared.
    pub fn with_exclusive_runs(mut self, exclusive: bool) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.exclusive = exclusive;
        }
        self
    }

    pub fn trigger(&self) -> &DailyTrigger {
        &self.inner.trigger
    }

    pub fn builder(&self) -> &Arc<CacheBuilder> {
        &self.inner.builder
    }

    pub fn metrics(&self) -> SyncMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Arm the daily timer. Returns `false` if one is already armed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut state = self.inner.state();
        if state.timer.as_ref().is_some_and(|t| !t.is_finished()) {
            tracing::debug!("Sync scheduler already started");
            return false;
        }

        let next = self.inner.trigger.next_after(Utc::now());
        state.next_run_at = Some(next);
        state.timer = Some(tokio::spawn(timer_loop(Arc::clone(&self.inner))));
        tracing::info!(
            schedule = %self.inner.trigger.describe(None),
            next_run_at = %next,
            "Sync scheduler started"
        );
        true
    }

    /// Cancel the timer. Returns whether one was armed.
    pub fn stop(&self) -> bool {
        let mut state = self.inner.state();
        state.next_run_at = None;
        match state.timer.take() {
            Some(timer) => {
                let was_armed = !timer.is_finished();
                timer.abort();
                if was_armed {
                    tracing::info!("Sync scheduler stopped");
                }
                was_armed
            }
            None => false,
        }
    }

    /// Import then rebuild, now.
    ///
    /// # Errors
    ///
    /// - `SyncError::AlreadyRunning` with exclusive runs and a run in progress
    /// - `SyncError::ImportSpawn` / `ImportFailed`; nothing is rebuilt
    /// - `SyncError::RebuildIncomplete`; keys that did build stay written
    pub async fn run_once(&self) -> CivitasResult<SyncRun> {
        self.inner.run().await
    }

    /// Rebuild immediately if the cache missed its last scheduled refresh.
    /// Returns the build report when a rebuild happened.
    pub async fn refresh_if_stale(&self) -> Option<BuildReport> {
        let last = self.inner.builder.last_build_at().await;
        if !self.inner.trigger.should_refresh(last, Utc::now()) {
            tracing::info!(last_build_at = ?last, "Aggregate cache is current");
            return None;
        }
        tracing::info!(last_build_at = ?last, "Aggregate cache is stale, rebuilding");
        Some(self.inner.builder.build().await)
    }

    pub fn status(&self) -> SchedulerStatus {
        let running = self.inner.running.load(Ordering::SeqCst) > 0;
        let metrics = self.inner.metrics.snapshot();
        let state = self.inner.state();
        let scheduled = state.timer.as_ref().is_some_and(|t| !t.is_finished());
        let phase = if running {
            SchedulerPhase::Running
        } else if scheduled {
            SchedulerPhase::Scheduled
        } else {
            SchedulerPhase::Idle
        };

        SchedulerStatus {
            phase,
            scheduled,
            running,
            description: self.inner.trigger.describe(state.next_run_at),
            next_run_at: state.next_run_at,
            last_run_at: state.last_run_at,
            last_outcome: state.last_outcome.clone(),
            runs: metrics.runs,
            failures: metrics.failures,
        }
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        if let Some(timer) = self.inner.state().timer.take() {
            timer.abort();
        }
    }
}

impl std::fmt::Debug for SyncScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncScheduler")
            .field("trigger", &self.inner.trigger)
            .field("exclusive", &self.inner.exclusive)
            .finish_non_exhaustive()
    }
}

async fn timer_loop(inner: Arc<Inner>) {
    loop {
        let next = inner.trigger.next_after(Utc::now());
        inner.state().next_run_at = Some(next);
        sleep_until(next).await;

        let run_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            if let Err(e) = run_inner.run().await {
                tracing::warn!(error = %e, "Scheduled sync run did not complete");
            }
        });
    }
}

/// Sleep until the wall clock reaches `deadline`.
async fn sleep_until(deadline: DateTime<Utc>) {
    loop {
        let remaining = match (deadline - Utc::now()).to_std() {
            Ok(d) if !d.is_zero() => d,
            _ => return,
        };
        tokio::time::sleep(remaining.min(MAX_SLEEP_SLICE)).await;
    }
}
