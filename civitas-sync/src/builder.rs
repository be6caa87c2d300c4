//! Cache Builder
//!
//! Precomputes the fixed set of dashboard aggregates and writes them into the
//! aggregation cache with the TTL of their class (the rebuild TTL). Grouped queries are answered once
//! per build and shared between the keys that need them, so a full build
//! costs one scan per grouped field plus one total count.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use civitas_core::constants::{DAILY_WINDOW_DAYS, MONTHLY_WINDOW_MONTHS, TOP_N};
use civitas_core::{CivitasError, CivitasResult, ComputeError, TtlClass, TtlPolicy};
use civitas_storage::{AggregationCache, CacheRead};
use serde::Serialize;
use serde_json::Value;

use crate::buckets::{day_window, month_label, month_start, month_window, parse_iso_date};
use crate::model::{
    status_counts, theme_counts, top_n, DayCount, MonthCount, Summary,
};
use crate::source::{AggregateQuery, AggregateSource, DateRange, GroupCount, GroupField};

/// Keys produced by the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AggregateKey {
    Summary,
    ByMonth,
    ByDay,
    CountByOrgaos,
    ByTheme,
    StatusOverview,
}

impl AggregateKey {
    /// Build order.
    pub const ALL: [AggregateKey; 6] = [
        AggregateKey::Summary,
        AggregateKey::ByMonth,
        AggregateKey::ByDay,
        AggregateKey::CountByOrgaos,
        AggregateKey::ByTheme,
        AggregateKey::StatusOverview,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AggregateKey::Summary => "summary",
            AggregateKey::ByMonth => "by-month",
            AggregateKey::ByDay => "by-day",
            AggregateKey::CountByOrgaos => "count-by-orgaos",
            AggregateKey::ByTheme => "by-theme",
            AggregateKey::StatusOverview => "status-overview",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == raw)
    }

    /// Builder keys must outlive the gap between daily rebuilds, whatever
    /// their name would classify as.
    pub fn ttl_class(self) -> TtlClass {
        TtlClass::Aggregate
    }
}

impl fmt::Display for AggregateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one full build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub started_at: DateTime<Utc>,
    /// Calendar date the date windows were anchored on.
    pub for_date: NaiveDate,
    #[serde(skip)]
    pub values: BTreeMap<String, Value>,
    pub succeeded: Vec<String>,
    /// Key to failure reason.
    pub failed: BTreeMap<String, String>,
    /// Computed keys whose durable write did not land.
    pub unsaved: Vec<String>,
    pub duration_ms: u64,
}

impl BuildReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_keys(&self) -> Vec<String> {
        self.failed.keys().cloned().collect()
    }
}

/// Per-build answers to aggregate queries. Failures are remembered too, so a
/// broken field is queried once per build.
struct QueryMemo<'a> {
    source: &'a dyn AggregateSource,
    answers: HashMap<AggregateQuery, CivitasResult<Vec<GroupCount>>>,
}

impl<'a> QueryMemo<'a> {
    fn new(source: &'a dyn AggregateSource) -> Self {
        Self {
            source,
            answers: HashMap::new(),
        }
    }

    async fn ask(&mut self, query: AggregateQuery) -> CivitasResult<Vec<GroupCount>> {
        if let Some(answer) = self.answers.get(&query) {
            return answer.clone();
        }
        let answer = self.source.aggregate(&query).await;
        if let Err(e) = &answer {
            tracing::warn!(query = %query.label(), error = %e, "Aggregate query failed");
        }
        self.answers.insert(query, answer.clone());
        answer
    }

    async fn count(&mut self) -> CivitasResult<u64> {
        let rows = self.ask(AggregateQuery::count_all()).await?;
        Ok(rows.iter().map(|r| r.count).sum())
    }

    async fn groups(&mut self, field: GroupField) -> CivitasResult<Vec<GroupCount>> {
        self.ask(AggregateQuery::group_by(field)).await
    }

    /// Daily counts over the monthly window, which also covers the daily one.
    async fn daily_histogram(&mut self, today: NaiveDate) -> CivitasResult<BTreeMap<NaiveDate, u64>> {
        let from = month_start(today, MONTHLY_WINDOW_MONTHS.saturating_sub(1)).ok_or_else(|| {
            CivitasError::from(ComputeError::QueryFailed {
                query: "histogram".to_string(),
                reason: format!("date window before {} is out of range", today),
            })
        })?;
        let rows = self
            .ask(AggregateQuery::GroupBy {
                field: GroupField::DataCriacaoIso,
                created: Some(DateRange::new(from, today)),
            })
            .await?;

        let mut histogram = BTreeMap::new();
        for row in rows {
            if let Some(date) = row.key.as_deref().and_then(parse_iso_date) {
                *histogram.entry(date).or_insert(0) += row.count;
            }
        }
        Ok(histogram)
    }
}

fn trailing_days(histogram: &BTreeMap<NaiveDate, u64>, today: NaiveDate, days: u32) -> u64 {
    day_window(today, days)
        .iter()
        .map(|d| histogram.get(d).copied().unwrap_or(0))
        .sum()
}

/// Computes and stores the dashboard aggregates.
pub struct CacheBuilder {
    source: Arc<dyn AggregateSource>,
    cache: AggregationCache,
    ttl_policy: TtlPolicy,
    tz: Tz,
}

impl CacheBuilder {
    pub fn new(
        source: Arc<dyn AggregateSource>,
        cache: AggregationCache,
        ttl_policy: TtlPolicy,
        tz: Tz,
    ) -> Self {
        Self {
            source,
            cache,
            ttl_policy,
            tz,
        }
    }

    pub fn cache(&self) -> &AggregationCache {
        &self.cache
    }

    pub fn ttl_policy(&self) -> &TtlPolicy {
        &self.ttl_policy
    }

    /// Lifetime given to `key` on every write, by build or on demand.
    pub fn ttl_for(&self, key: AggregateKey) -> Duration {
        self.ttl_policy.ttl_for(key.ttl_class())
    }

    /// Today's date in the builder's timezone.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.tz).date_naive()
    }

    /// Build every key for today.
    pub async fn build(&self) -> BuildReport {
        self.build_at(self.today()).await
    }

    /// Build every key with date windows anchored on `today`.
    ///
    /// A key that fails is recorded and skipped; the remaining keys are still
    /// computed and written.
    pub async fn build_at(&self, today: NaiveDate) -> BuildReport {
        let started_at = Utc::now();
        let started = Instant::now();
        let mut memo = QueryMemo::new(self.source.as_ref());
        let mut report = BuildReport {
            started_at,
            for_date: today,
            values: BTreeMap::new(),
            succeeded: Vec::new(),
            failed: BTreeMap::new(),
            unsaved: Vec::new(),
            duration_ms: 0,
        };

        tracing::info!(for_date = %today, "Cache rebuild started");

        for key in AggregateKey::ALL {
            let name = key.as_str().to_string();
            let value = match self.compute_with(key, today, &mut memo).await {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(key = %name, error = %e, "Aggregate computation failed, skipping key");
                    report.failed.insert(name, e.to_string());
                    continue;
                }
            };

            match self.cache.put(&name, &value, self.ttl_for(key)).await {
                Ok(true) => {}
                Ok(false) => report.unsaved.push(name.clone()),
                Err(e) => {
                    report.failed.insert(name, e.to_string());
                    continue;
                }
            }
            report.succeeded.push(name.clone());
            report.values.insert(name, value);
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        if report.is_complete() {
            tracing::info!(
                keys = report.succeeded.len(),
                unsaved = report.unsaved.len(),
                duration_ms = report.duration_ms,
                "Cache rebuild finished"
            );
        } else {
            tracing::warn!(
                succeeded = report.succeeded.len(),
                failed = ?report.failed_keys(),
                duration_ms = report.duration_ms,
                "Cache rebuild finished with failures"
            );
        }
        report
    }

    /// Compute a single key without touching the cache.
    pub async fn compute(&self, key: AggregateKey, today: NaiveDate) -> CivitasResult<Value> {
        let mut memo = QueryMemo::new(self.source.as_ref());
        self.compute_with(key, today, &mut memo).await
    }

    /// Serve `key` from the cache, computing and storing it on a miss.
    pub async fn get_or_build(&self, key: AggregateKey) -> CivitasResult<CacheRead<Value>> {
        let today = self.today();
        self.cache
            .get_or_compute(key.as_str(), self.ttl_for(key), || self.compute(key, today))
            .await
    }

    /// When the last full build stored its summary, if it is still cached.
    pub async fn last_build_at(&self) -> Option<DateTime<Utc>> {
        self.cache
            .durable()
            .get_entry(AggregateKey::Summary.as_str())
            .await
            .map(|entry| entry.created_at)
    }

    async fn compute_with(
        &self,
        key: AggregateKey,
        today: NaiveDate,
        memo: &mut QueryMemo<'_>,
    ) -> CivitasResult<Value> {
        match key {
            AggregateKey::Summary => {
                let total = memo.count().await?;
                let histogram = memo.daily_histogram(today).await?;
                let summary = Summary {
                    total,
                    last7: trailing_days(&histogram, today, 7),
                    last30: trailing_days(&histogram, today, DAILY_WINDOW_DAYS),
                    status_counts: status_counts(&memo.groups(GroupField::Status).await?),
                    top_orgaos: top_n(&memo.groups(GroupField::Orgaos).await?, TOP_N),
                    top_unidade_cadastro: top_n(&memo.groups(GroupField::UnidadeCadastro).await?, TOP_N),
                    top_tipo_manifestacao: top_n(
                        &memo.groups(GroupField::TipoDeManifestacao).await?,
                        TOP_N,
                    ),
                    top_tema: top_n(&memo.groups(GroupField::Tema).await?, TOP_N),
                };
                to_json(key, &summary)
            }
            AggregateKey::ByMonth => {
                let histogram = memo.daily_histogram(today).await?;
                let mut per_month: HashMap<String, u64> = HashMap::new();
                for (date, count) in &histogram {
                    *per_month.entry(date.format("%Y-%m").to_string()).or_insert(0) += count;
                }
                let months: Vec<MonthCount> = month_window(today, MONTHLY_WINDOW_MONTHS)
                    .into_iter()
                    .map(|(year, month)| {
                        let ym = month_label(year, month);
                        let count = per_month.get(&ym).copied().unwrap_or(0);
                        MonthCount { ym, count }
                    })
                    .collect();
                to_json(key, &months)
            }
            AggregateKey::ByDay => {
                let histogram = memo.daily_histogram(today).await?;
                let days: Vec<DayCount> = day_window(today, DAILY_WINDOW_DAYS)
                    .into_iter()
                    .map(|date| DayCount {
                        date: date.format("%Y-%m-%d").to_string(),
                        count: histogram.get(&date).copied().unwrap_or(0),
                    })
                    .collect();
                to_json(key, &days)
            }
            AggregateKey::CountByOrgaos => {
                to_json(key, &top_n(&memo.groups(GroupField::Orgaos).await?, TOP_N))
            }
            AggregateKey::ByTheme => to_json(key, &theme_counts(&memo.groups(GroupField::Tema).await?)),
            AggregateKey::StatusOverview => {
                to_json(key, &status_counts(&memo.groups(GroupField::Status).await?))
            }
        }
    }
}

impl fmt::Debug for CacheBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheBuilder")
            .field("ttl_policy", &self.ttl_policy)
            .field("tz", &self.tz)
            .finish_non_exhaustive()
    }
}

fn to_json<T: Serialize>(key: AggregateKey, value: &T) -> CivitasResult<Value> {
    serde_json::to_value(value).map_err(|e| {
        ComputeError::Serialization {
            key: key.as_str().to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}
