//! Shapes of the precomputed aggregates, as served to the dashboard.

use civitas_core::constants::UNSET_GROUP_LABEL;
use serde::{Deserialize, Serialize};

use crate::source::GroupCount;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCount {
    pub status: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyCount {
    pub key: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthCount {
    pub ym: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayCount {
    pub date: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeCount {
    pub tema: String,
    pub quantidade: u64,
}

/// Dashboard headline numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total: u64,
    pub last7: u64,
    pub last30: u64,
    pub status_counts: Vec<StatusCount>,
    pub top_orgaos: Vec<KeyCount>,
    pub top_unidade_cadastro: Vec<KeyCount>,
    pub top_tipo_manifestacao: Vec<KeyCount>,
    pub top_tema: Vec<KeyCount>,
}

/// Sort groups by count descending, ties broken by label, and label unset
/// groups.
pub(crate) fn ranked(groups: &[GroupCount]) -> Vec<(String, u64)> {
    let mut rows: Vec<(String, u64)> = groups
        .iter()
        .map(|g| {
            let label = g
                .key
                .clone()
                .unwrap_or_else(|| UNSET_GROUP_LABEL.to_string());
            (label, g.count)
        })
        .collect();
    rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    rows
}

pub(crate) fn top_n(groups: &[GroupCount], n: usize) -> Vec<KeyCount> {
    ranked(groups)
        .into_iter()
        .take(n)
        .map(|(key, count)| KeyCount { key, count })
        .collect()
}

pub(crate) fn status_counts(groups: &[GroupCount]) -> Vec<StatusCount> {
    ranked(groups)
        .into_iter()
        .map(|(status, count)| StatusCount { status, count })
        .collect()
}

/// Themes without a value are left out.
pub(crate) fn theme_counts(groups: &[GroupCount]) -> Vec<ThemeCount> {
    let named: Vec<GroupCount> = groups.iter().filter(|g| g.key.is_some()).cloned().collect();
    ranked(&named)
        .into_iter()
        .map(|(tema, quantidade)| ThemeCount { tema, quantidade })
        .collect()
}
