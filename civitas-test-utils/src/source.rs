//! Aggregate source fixture that records the queries it answers.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use civitas_core::{CivitasResult, ComputeError};
use civitas_sync::{AggregateQuery, AggregateSource, GroupCount, GroupField, MemorySource, Record};

/// [`MemorySource`] plus a query log and switchable per-field failures.
#[derive(Debug, Default)]
pub struct FixtureSource {
    records: MemorySource,
    queries: Mutex<Vec<AggregateQuery>>,
    broken: Mutex<HashSet<GroupField>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FixtureSource {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: MemorySource::new(records),
            ..Self::default()
        }
    }

    pub fn replace(&self, records: Vec<Record>) {
        self.records.replace(records);
    }

    /// Make every grouped query on `field` fail.
    pub fn break_field(&self, field: GroupField) {
        lock(&self.broken).insert(field);
    }

    pub fn repair_all(&self) {
        lock(&self.broken).clear();
    }

    pub fn queries(&self) -> Vec<AggregateQuery> {
        lock(&self.queries).clone()
    }

    pub fn query_count(&self) -> usize {
        lock(&self.queries).len()
    }
}

#[async_trait]
impl AggregateSource for FixtureSource {
    async fn aggregate(&self, query: &AggregateQuery) -> CivitasResult<Vec<GroupCount>> {
        lock(&self.queries).push(query.clone());
        if let AggregateQuery::GroupBy { field, .. } = query {
            if lock(&self.broken).contains(field) {
                return Err(ComputeError::QueryFailed {
                    query: query.label(),
                    reason: "field switched off by test".to_string(),
                }
                .into());
            }
        }
        self.records.aggregate(query).await
    }
}

/// A record with the given status, organ, theme and creation date.
pub fn record(status: &str, orgao: &str, tema: Option<&str>, created: &str) -> Record {
    Record {
        status: Some(status.to_string()),
        orgaos: Some(orgao.to_string()),
        unidade_cadastro: Some(format!("{} - sede", orgao)),
        tipo_de_manifestacao: Some("Reclamação".to_string()),
        tema: tema.map(str::to_string),
        data_criacao_iso: Some(created.to_string()),
    }
}

/// A small, varied record set dated around mid-June 2024.
pub fn sample_records() -> Vec<Record> {
    vec![
        record("Aberto", "SEMSA", Some("Saúde"), "2024-06-15"),
        record("Aberto", "SEMSA", Some("Saúde"), "2024-06-14"),
        record("Em andamento", "SEMED", Some("Educação"), "2024-06-10"),
        record("Fechado", "SEMED", Some("Educação"), "2024-05-20"),
        record("Fechado", "SEMOB", Some("Obras"), "2024-02-03"),
        record("Fechado", "SEMSA", None, "2023-09-30"),
        record("Arquivado", "SEMOB", Some("Obras"), "2021-01-01"),
    ]
}
