use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use civitas_core::{CivitasError, CivitasResult, SyncError, TtlPolicy};
use civitas_storage::{AggregationCache, DurableCache, MemoryCacheStore};
use civitas_sync::{
    AggregateKey, CacheBuilder, DailyTrigger, GroupField, ImportPipeline, NoopPipeline,
    SyncScheduler,
};
use civitas_test_utils::{arb_records, record, sample_records, FixtureSource, FlakyStore};
use proptest::prelude::*;
use serde_json::Value;

const QUERIES_PER_BUILD: usize = 7;

fn june_15() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 15).expect("valid date")
}

fn builder_over(source: Arc<FixtureSource>, cache: AggregationCache) -> CacheBuilder {
    CacheBuilder::new(
        source,
        cache,
        TtlPolicy::new().with_rebuild_ttl(Duration::from_secs(3600)),
        chrono_tz::UTC,
    )
}

fn memory_cache() -> AggregationCache {
    AggregationCache::new(DurableCache::new(Arc::new(MemoryCacheStore::new())))
}

struct FailingImport;

#[async_trait]
impl ImportPipeline for FailingImport {
    fn describe(&self) -> String {
        "failing import".to_string()
    }

    async fn run(&self) -> CivitasResult<()> {
        Err(SyncError::ImportFailed { code: Some(2) }.into())
    }
}

#[tokio::test]
async fn build_answers_from_fixture_records() {
    let source = Arc::new(FixtureSource::new(sample_records()));
    let builder = builder_over(source.clone(), memory_cache());

    let report = builder.build_at(june_15()).await;
    assert!(report.is_complete(), "failed: {:?}", report.failed);
    assert_eq!(source.query_count(), QUERIES_PER_BUILD);

    let summary = &report.values["summary"];
    assert_eq!(summary["total"], 7);
    assert_eq!(summary["last7"], 3);
    assert_eq!(summary["last30"], 4);
    assert_eq!(summary["topOrgaos"][0]["key"], "SEMSA");
    assert_eq!(summary["topOrgaos"][0]["count"], 3);

    let themes = report.values["by-theme"].as_array().expect("by-theme is an array");
    assert!(themes.iter().all(|t| t["tema"].is_string()));
    assert_eq!(report.values["count-by-orgaos"], summary["topOrgaos"]);
}

#[tokio::test]
async fn rebuilding_unchanged_records_is_idempotent() {
    let source = Arc::new(FixtureSource::new(sample_records()));
    let cache = memory_cache();
    let builder = builder_over(source.clone(), cache.clone());

    let first = builder.build_at(june_15()).await;
    let second = builder.build_at(june_15()).await;

    assert_eq!(first.values, second.values);
    assert_eq!(source.query_count(), 2 * QUERIES_PER_BUILD);
    for key in AggregateKey::ALL {
        assert_eq!(
            cache.durable().get(key.as_str()).await.as_ref(),
            second.values.get(key.as_str()),
            "{key} differs from the stored value"
        );
    }
}

#[tokio::test]
async fn broken_field_fails_only_dependent_keys() {
    let source = Arc::new(FixtureSource::new(sample_records()));
    source.break_field(GroupField::Tema);
    let builder = builder_over(source.clone(), memory_cache());

    let report = builder.build_at(june_15()).await;

    assert_eq!(report.failed_keys(), vec!["by-theme", "summary"]);
    assert_eq!(report.succeeded.len(), AggregateKey::ALL.len() - 2);
    let tema_queries = source
        .queries()
        .iter()
        .filter(|q| q.label().contains("tema"))
        .count();
    assert_eq!(tema_queries, 1, "a failed query is not repeated within a build");

    source.repair_all();
    assert!(builder.build_at(june_15()).await.is_complete());
}

#[tokio::test]
async fn storage_outage_still_builds_but_reports_unsaved() {
    let source = Arc::new(FixtureSource::new(sample_records()));
    let store = Arc::new(FlakyStore::down());
    let builder = builder_over(
        source,
        AggregationCache::new(DurableCache::new(store.clone())),
    );

    let report = builder.build_at(june_15()).await;

    assert!(report.is_complete());
    assert_eq!(report.unsaved.len(), AggregateKey::ALL.len());
    assert_eq!(
        builder.cache().durable().metrics().snapshot().storage_errors,
        AggregateKey::ALL.len() as u64
    );
}

#[tokio::test]
async fn import_failure_aborts_rebuild() {
    let source = Arc::new(FixtureSource::new(sample_records()));
    let cache = memory_cache();
    let builder = Arc::new(builder_over(source.clone(), cache.clone()));
    let trigger = DailyTrigger::parse("07:00", "America/Sao_Paulo").expect("valid trigger");
    let scheduler = SyncScheduler::new(trigger, Arc::new(FailingImport), builder);

    let err = scheduler.run_once().await.expect_err("import fails");

    assert!(matches!(
        err,
        CivitasError::Sync(SyncError::ImportFailed { code: Some(2) })
    ));
    assert_eq!(source.query_count(), 0);
    assert!(cache.durable().get("summary").await.is_none());

    let status = scheduler.status();
    assert_eq!(status.failures, 1);
    assert!(status.last_outcome.is_some_and(|o| !o.is_success()));
    assert_eq!(scheduler.metrics().import_failures, 1);
}

#[tokio::test]
async fn successive_runs_pick_up_new_records() {
    let source = Arc::new(FixtureSource::new(sample_records()));
    let cache = memory_cache();
    let builder = Arc::new(builder_over(source.clone(), cache.clone()));
    let trigger = DailyTrigger::parse("07:00", "UTC").expect("valid trigger");
    let scheduler = SyncScheduler::new(trigger, Arc::new(NoopPipeline), builder);

    scheduler.run_once().await.expect("first run");
    let first_total = cache.durable().get("summary").await.expect("summary stored")["total"].clone();
    assert_eq!(first_total, 7);

    source.replace(vec![record("Aberto", "SEMSA", Some("Saúde"), "2024-06-01")]);
    let run = scheduler.run_once().await.expect("second run");

    assert!(run.report.is_complete());
    assert_eq!(
        cache.durable().get("summary").await.expect("summary stored")["total"],
        1
    );
    assert_eq!(scheduler.metrics().runs, 2);
}

fn sum_counts(value: &Value, field: &str) -> u64 {
    value
        .as_array()
        .map(|rows| rows.iter().filter_map(|r| r[field].as_u64()).sum())
        .unwrap_or(0)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn windows_are_complete_on_any_record_set(records in arb_records(60)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        let total = records.len() as u64;
        let source = Arc::new(FixtureSource::new(records));
        let builder = builder_over(source, memory_cache());

        let report = runtime.block_on(builder.build_at(june_15()));
        prop_assert!(report.is_complete());

        let by_day = &report.values["by-day"];
        let by_month = &report.values["by-month"];
        let summary = &report.values["summary"];
        prop_assert_eq!(by_day.as_array().map(Vec::len), Some(30));
        prop_assert_eq!(by_month.as_array().map(Vec::len), Some(12));
        prop_assert_eq!(summary["total"].as_u64(), Some(total));
        prop_assert_eq!(sum_counts(by_day, "count"), summary["last30"].as_u64().unwrap_or(0));
        prop_assert!(sum_counts(by_month, "count") <= total);
        prop_assert_eq!(sum_counts(&report.values["status-overview"], "count"), total);
    }
}
