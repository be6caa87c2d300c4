//! Narrow interface to the aggregation query layer.
//!
//! The builder only ever asks two questions of the record store: how many
//! records match, and how many records fall in each group of one field.

use async_trait::async_trait;
use chrono::NaiveDate;
use civitas_core::CivitasResult;
use serde::{Deserialize, Serialize};

/// Record fields the builder groups by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GroupField {
    Status,
    Orgaos,
    UnidadeCadastro,
    TipoDeManifestacao,
    Tema,
    /// ISO creation date (`YYYY-MM-DD`)
    DataCriacaoIso,
}

impl GroupField {
    /// Column name in the record store.
    pub fn column(self) -> &'static str {
        match self {
            GroupField::Status => "status",
            GroupField::Orgaos => "orgaos",
            GroupField::UnidadeCadastro => "unidadeCadastro",
            GroupField::TipoDeManifestacao => "tipoDeManifestacao",
            GroupField::Tema => "tema",
            GroupField::DataCriacaoIso => "dataCriacaoIso",
        }
    }
}

/// Inclusive range of creation dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }
}

/// One aggregate question.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AggregateQuery {
    /// Number of records, optionally restricted to a creation window.
    Count { created: Option<DateRange> },
    /// Record count per distinct value of `field`.
    GroupBy {
        field: GroupField,
        created: Option<DateRange>,
    },
}

impl AggregateQuery {
    pub fn count_all() -> Self {
        AggregateQuery::Count { created: None }
    }

    pub fn group_by(field: GroupField) -> Self {
        AggregateQuery::GroupBy {
            field,
            created: None,
        }
    }

    /// Short label for logs and error messages.
    pub fn label(&self) -> String {
        match self {
            AggregateQuery::Count { created: None } => "count".to_string(),
            AggregateQuery::Count {
                created: Some(range),
            } => format!("count[{}..{}]", range.from, range.to),
            AggregateQuery::GroupBy {
                field,
                created: None,
            } => format!("groupBy({})", field.column()),
            AggregateQuery::GroupBy {
                field,
                created: Some(range),
            } => format!("groupBy({})[{}..{}]", field.column(), range.from, range.to),
        }
    }
}

/// One row of an aggregate answer. `Count` answers with a single row whose
/// key is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCount {
    pub key: Option<String>,
    pub count: u64,
}

impl GroupCount {
    pub fn new(key: Option<String>, count: u64) -> Self {
        Self { key, count }
    }
}

/// The aggregation query layer.
#[async_trait]
pub trait AggregateSource: Send + Sync {
    async fn aggregate(&self, query: &AggregateQuery) -> CivitasResult<Vec<GroupCount>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn test_range_is_inclusive() {
        let range = DateRange::new(date(2024, 1, 1), date(2024, 1, 31));
        assert!(range.contains(date(2024, 1, 1)));
        assert!(range.contains(date(2024, 1, 31)));
        assert!(!range.contains(date(2024, 2, 1)));
    }

    #[test]
    fn test_query_labels() {
        assert_eq!(AggregateQuery::count_all().label(), "count");
        assert_eq!(AggregateQuery::group_by(GroupField::Tema).label(), "groupBy(tema)");
        let windowed = AggregateQuery::Count {
            created: Some(DateRange::new(date(2024, 1, 1), date(2024, 1, 7))),
        };
        assert_eq!(windowed.label(), "count[2024-01-01..2024-01-07]");
    }
}
