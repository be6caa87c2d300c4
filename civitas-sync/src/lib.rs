//! CIVITAS Sync - Cache Builder and Scheduler
//!
//! Keeps the aggregation cache filled: the [`CacheBuilder`] computes the fixed
//! set of dashboard aggregates from an [`AggregateSource`], and the
//! [`SyncScheduler`] runs the import pipeline followed by a rebuild once a day.

pub mod buckets;
pub mod builder;
pub mod config;
pub mod import;
pub mod model;
pub mod record;
pub mod scheduler;
pub mod source;
pub mod sweep;
pub mod trigger;

pub use builder::{AggregateKey, BuildReport, CacheBuilder};
pub use config::{ImportCommand, SyncConfig};
pub use import::{CommandPipeline, ImportPipeline, NoopPipeline};
pub use model::{DayCount, KeyCount, MonthCount, StatusCount, Summary, ThemeCount};
pub use record::{aggregate_records, MemorySource, Record};
pub use scheduler::{
    RunOutcome, SchedulerPhase, SchedulerStatus, SyncMetrics, SyncMetricsSnapshot, SyncRun,
    SyncScheduler,
};
pub use source::{AggregateQuery, AggregateSource, DateRange, GroupCount, GroupField};
pub use sweep::{cache_sweep_task, sweep_once, SweepConfig, SweepMetrics, SweepSnapshot};
pub use trigger::DailyTrigger;
