//! Proptest generators.

use chrono::NaiveDate;
use civitas_sync::Record;
use proptest::prelude::*;
use serde_json::{Map, Value};

pub fn arb_date() -> impl Strategy<Value = NaiveDate> {
    (2015i32..2030, 1u32..=12, 1u32..=28)
        .prop_map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MIN))
}

fn arb_label(labels: &'static [&'static str]) -> impl Strategy<Value = Option<String>> {
    prop::option::weighted(0.85, prop::sample::select(labels).prop_map(str::to_string))
}

pub fn arb_record() -> impl Strategy<Value = Record> {
    (
        arb_label(&["Aberto", "Em andamento", "Fechado", "Arquivado"]),
        arb_label(&["SEMSA", "SEMED", "SEMOB", "SEMAS", "GABINETE"]),
        arb_label(&["Saúde", "Educação", "Obras", "Transporte"]),
        prop::option::weighted(0.95, arb_date()),
    )
        .prop_map(|(status, orgaos, tema, created)| Record {
            status,
            unidade_cadastro: orgaos.as_ref().map(|o| format!("{} - sede", o)),
            orgaos,
            tipo_de_manifestacao: Some("Reclamação".to_string()),
            tema,
            data_criacao_iso: created.map(|d| d.format("%Y-%m-%d").to_string()),
        })
}

pub fn arb_records(max: usize) -> impl Strategy<Value = Vec<Record>> {
    prop::collection::vec(arb_record(), 0..max)
}

/// Query parameter maps with scalar, null and nested values.
pub fn arb_params() -> impl Strategy<Value = Map<String, Value>> {
    let scalar = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(Value::from),
        "[a-z0-9 ]{0,12}".prop_map(Value::String),
    ];
    let value = scalar.prop_recursive(2, 8, 3, |inner| {
        prop::collection::btree_map("[a-z]{1,4}", inner, 0..3)
            .prop_map(|m| Value::Object(m.into_iter().collect()))
    });
    prop::collection::btree_map("[a-zA-Z_]{1,10}", value, 0..6)
        .prop_map(|m| m.into_iter().collect())
}
