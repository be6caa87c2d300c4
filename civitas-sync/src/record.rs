//! In-memory record set answering aggregate queries.
//!
//! Used for record snapshots small enough to hold in memory, and for tests.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::NaiveDate;
use civitas_core::CivitasResult;
use serde::{Deserialize, Serialize};

use crate::buckets::parse_iso_date;
use crate::source::{AggregateQuery, AggregateSource, DateRange, GroupCount, GroupField};

/// The record fields the aggregates read. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Record {
    pub status: Option<String>,
    pub orgaos: Option<String>,
    pub unidade_cadastro: Option<String>,
    pub tipo_de_manifestacao: Option<String>,
    pub tema: Option<String>,
    pub data_criacao_iso: Option<String>,
}

impl Record {
    pub fn field(&self, field: GroupField) -> Option<&str> {
        let value = match field {
            GroupField::Status => &self.status,
            GroupField::Orgaos => &self.orgaos,
            GroupField::UnidadeCadastro => &self.unidade_cadastro,
            GroupField::TipoDeManifestacao => &self.tipo_de_manifestacao,
            GroupField::Tema => &self.tema,
            GroupField::DataCriacaoIso => &self.data_criacao_iso,
        };
        value.as_deref().filter(|v| !v.trim().is_empty())
    }

    pub fn created(&self) -> Option<NaiveDate> {
        self.data_criacao_iso.as_deref().and_then(parse_iso_date)
    }

    /// Records without a creation date never fall inside a window.
    fn within(&self, window: &Option<DateRange>) -> bool {
        match window {
            None => true,
            Some(range) => self.created().is_some_and(|d| range.contains(d)),
        }
    }
}

/// Answer `query` by scanning `records`. Groups come back ordered by key.
pub fn aggregate_records(records: &[Record], query: &AggregateQuery) -> Vec<GroupCount> {
    match query {
        AggregateQuery::Count { created } => {
            let count = records.iter().filter(|r| r.within(created)).count() as u64;
            vec![GroupCount::new(None, count)]
        }
        AggregateQuery::GroupBy { field, created } => {
            let mut groups: BTreeMap<Option<&str>, u64> = BTreeMap::new();
            for record in records.iter().filter(|r| r.within(created)) {
                *groups.entry(record.field(*field)).or_insert(0) += 1;
            }
            groups
                .into_iter()
                .map(|(key, count)| GroupCount::new(key.map(str::to_string), count))
                .collect()
        }
    }
}

/// Aggregate source over a replaceable in-memory record set.
#[derive(Debug, Default)]
pub struct MemorySource {
    records: RwLock<Arc<Vec<Record>>>,
}

impl MemorySource {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: RwLock::new(Arc::new(records)),
        }
    }

    /// Swap in a new record set. Queries already running keep the old one.
    pub fn replace(&self, records: Vec<Record>) {
        *self.records.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(records);
    }

    pub fn len(&self) -> usize {
        self.current().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current().is_empty()
    }

    fn current(&self) -> Arc<Vec<Record>> {
        Arc::clone(&self.records.read().unwrap_or_else(PoisonError::into_inner))
    }
}

#[async_trait]
impl AggregateSource for MemorySource {
    async fn aggregate(&self, query: &AggregateQuery) -> CivitasResult<Vec<GroupCount>> {
        Ok(aggregate_records(&self.current(), query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: &str, tema: Option<&str>, created: &str) -> Record {
        Record {
            status: Some(status.to_string()),
            tema: tema.map(str::to_string),
            data_criacao_iso: Some(created.to_string()),
            ..Record::default()
        }
    }

    #[test]
    fn test_count_with_window() {
        let records = vec![
            record("Aberto", None, "2024-06-01"),
            record("Aberto", None, "2024-05-01"),
            Record::default(),
        ];
        assert_eq!(aggregate_records(&records, &AggregateQuery::count_all())[0].count, 3);

        let window = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 6, 1).expect("valid date"),
            NaiveDate::from_ymd_opt(2024, 6, 30).expect("valid date"),
        );
        let windowed = AggregateQuery::Count {
            created: Some(window),
        };
        assert_eq!(aggregate_records(&records, &windowed)[0].count, 1);
    }

    #[test]
    fn test_group_by_treats_blank_as_unset() {
        let records = vec![
            record("Aberto", Some("Saúde"), "2024-06-01"),
            record("Aberto", Some("  "), "2024-06-01"),
            record("Fechado", None, "2024-06-01"),
        ];
        let groups = aggregate_records(&records, &AggregateQuery::group_by(GroupField::Tema));
        assert_eq!(
            groups,
            vec![GroupCount::new(None, 2), GroupCount::new(Some("Saúde".into()), 1)]
        );
    }

    #[test]
    fn test_record_deserializes_camel_case() {
        let record: Record = serde_json::from_value(serde_json::json!({
            "status": "Aberto",
            "tipoDeManifestacao": "Reclamação",
            "dataCriacaoIso": "2024-06-01T12:00:00Z",
            "protocolo": "ignored"
        }))
        .expect("record should deserialize");
        assert_eq!(record.field(GroupField::TipoDeManifestacao), Some("Reclamação"));
        assert_eq!(record.created(), NaiveDate::from_ymd_opt(2024, 6, 1));
    }

    #[tokio::test]
    async fn test_memory_source_replace() {
        let source = MemorySource::new(vec![record("Aberto", None, "2024-06-01")]);
        let count = |rows: Vec<GroupCount>| rows[0].count;
        let before = source
            .aggregate(&AggregateQuery::count_all())
            .await
            .expect("aggregate should succeed");
        assert_eq!(count(before), 1);

        source.replace(Vec::new());
        assert!(source.is_empty());
        let after = source
            .aggregate(&AggregateQuery::count_all())
            .await
            .expect("aggregate should succeed");
        assert_eq!(count(after), 0);
    }
}
