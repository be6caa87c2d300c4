//! TTL classes for cached aggregates.
//!
//! Volatile breakdowns live for seconds; distinct-value lists for minutes;
//! builder-populated aggregates until the next daily rebuild.

use crate::constants::DEFAULT_REBUILD_TTL_SECS;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Volatility class of a cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TtlClass {
    Overview,
    Status,
    Tema,
    Assunto,
    Categoria,
    Bairro,
    OrgaoMes,
    Distinct,
    Dashboard,
    Sla,
    /// Keys populated by the cache builder
    Aggregate,
    Default,
}

impl TtlClass {
    pub const ALL: [TtlClass; 12] = [
        TtlClass::Overview,
        TtlClass::Status,
        TtlClass::Tema,
        TtlClass::Assunto,
        TtlClass::Categoria,
        TtlClass::Bairro,
        TtlClass::OrgaoMes,
        TtlClass::Distinct,
        TtlClass::Dashboard,
        TtlClass::Sla,
        TtlClass::Aggregate,
        TtlClass::Default,
    ];

    /// Built-in lifetime for the class.
    pub fn default_ttl(self) -> Duration {
        let secs = match self {
            TtlClass::Overview | TtlClass::Dashboard => 5,
            TtlClass::Status
            | TtlClass::Tema
            | TtlClass::Assunto
            | TtlClass::Categoria
            | TtlClass::Bairro
            | TtlClass::Default => 15,
            TtlClass::OrgaoMes => 30,
            TtlClass::Sla => 60,
            TtlClass::Distinct => 300,
            TtlClass::Aggregate => DEFAULT_REBUILD_TTL_SECS,
        };
        Duration::from_secs(secs)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TtlClass::Overview => "overview",
            TtlClass::Status => "status",
            TtlClass::Tema => "tema",
            TtlClass::Assunto => "assunto",
            TtlClass::Categoria => "categoria",
            TtlClass::Bairro => "bairro",
            TtlClass::OrgaoMes => "orgaoMes",
            TtlClass::Distinct => "distinct",
            TtlClass::Dashboard => "dashboard",
            TtlClass::Sla => "sla",
            TtlClass::Aggregate => "aggregate",
            TtlClass::Default => "default",
        }
    }

    /// Classify an endpoint name or the endpoint part of a key.
    pub fn classify(endpoint: &str) -> TtlClass {
        let name = endpoint
            .trim_start_matches('/')
            .trim_start_matches("api/")
            .split(['/', ':', '?'])
            .next()
            .unwrap_or_default();
        TtlClass::ALL
            .iter()
            .copied()
            .find(|class| class.as_str() == name)
            .unwrap_or(TtlClass::Default)
    }
}

impl fmt::Display for TtlClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-class TTL table with optional overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TtlPolicy {
    overrides: HashMap<TtlClass, Duration>,
}

impl TtlPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `CIVITAS_TTL_<CLASS>_SECS` overrides, e.g. `CIVITAS_TTL_SLA_SECS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build overrides from any variable lookup. Unparseable or zero values
    /// are ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let overrides = TtlClass::ALL
            .iter()
            .filter_map(|&class| {
                let name = format!("CIVITAS_TTL_{}_SECS", class.as_str().to_uppercase());
                let secs: u64 = lookup(&name)?.trim().parse().ok()?;
                (secs > 0).then_some((class, Duration::from_secs(secs)))
            })
            .collect();
        Self { overrides }
    }

    /// Override the lifetime of one class.
    pub fn with_override(mut self, class: TtlClass, ttl: Duration) -> Self {
        self.overrides.insert(class, ttl);
        self
    }

    /// Lifetime of keys written by the cache builder.
    pub fn with_rebuild_ttl(self, ttl: Duration) -> Self {
        self.with_override(TtlClass::Aggregate, ttl)
    }

    pub fn rebuild_ttl(&self) -> Duration {
        self.ttl_for(TtlClass::Aggregate)
    }

    pub fn ttl_for(&self, class: TtlClass) -> Duration {
        self.overrides
            .get(&class)
            .copied()
            .unwrap_or_else(|| class.default_ttl())
    }

    /// TTL for an endpoint, classified by name.
    pub fn ttl_for_endpoint(&self, endpoint: &str) -> Duration {
        self.ttl_for(TtlClass::classify(endpoint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        assert_eq!(TtlClass::Overview.default_ttl(), Duration::from_secs(5));
        assert_eq!(TtlClass::Status.default_ttl(), Duration::from_secs(15));
        assert_eq!(TtlClass::OrgaoMes.default_ttl(), Duration::from_secs(30));
        assert_eq!(TtlClass::Sla.default_ttl(), Duration::from_secs(60));
        assert_eq!(TtlClass::Distinct.default_ttl(), Duration::from_secs(300));
        assert_eq!(TtlClass::Default.default_ttl(), Duration::from_secs(15));
        assert_eq!(
            TtlClass::Aggregate.default_ttl(),
            Duration::from_secs(DEFAULT_REBUILD_TTL_SECS)
        );
    }

    #[test]
    fn test_classify() {
        assert_eq!(TtlClass::classify("overview"), TtlClass::Overview);
        assert_eq!(TtlClass::classify("/api/distinct"), TtlClass::Distinct);
        assert_eq!(TtlClass::classify("orgaoMes:1a2b3c4d:v1"), TtlClass::OrgaoMes);
        assert_eq!(TtlClass::classify("/api/sla/summary"), TtlClass::Sla);
        assert_eq!(TtlClass::classify("something-else"), TtlClass::Default);
        assert_eq!(TtlClass::classify(""), TtlClass::Default);
    }

    #[test]
    fn test_policy_override() {
        let policy = TtlPolicy::new().with_override(TtlClass::Status, Duration::from_secs(120));
        assert_eq!(policy.ttl_for(TtlClass::Status), Duration::from_secs(120));
        assert_eq!(policy.ttl_for(TtlClass::Tema), Duration::from_secs(15));
        assert_eq!(
            policy.ttl_for_endpoint("/api/status"),
            Duration::from_secs(120)
        );
    }

    #[test]
    fn test_overrides_from_lookup() {
        let policy = TtlPolicy::from_lookup(|name| match name {
            "CIVITAS_TTL_SLA_SECS" => Some("600".to_string()),
            "CIVITAS_TTL_ORGAOMES_SECS" => Some(" 90 ".to_string()),
            "CIVITAS_TTL_STATUS_SECS" => Some("soon".to_string()),
            "CIVITAS_TTL_TEMA_SECS" => Some("0".to_string()),
            _ => None,
        });
        assert_eq!(policy.ttl_for(TtlClass::Sla), Duration::from_secs(600));
        assert_eq!(policy.ttl_for(TtlClass::OrgaoMes), Duration::from_secs(90));
        assert_eq!(policy.ttl_for(TtlClass::Status), Duration::from_secs(15));
        assert_eq!(policy.ttl_for(TtlClass::Tema), Duration::from_secs(15));
    }

    #[test]
    fn test_rebuild_ttl_is_aggregate_class() {
        let policy = TtlPolicy::new().with_rebuild_ttl(Duration::from_secs(3600));
        assert_eq!(policy.rebuild_ttl(), Duration::from_secs(3600));
        assert_eq!(policy.ttl_for(TtlClass::Aggregate), Duration::from_secs(3600));
        assert_eq!(TtlPolicy::new().rebuild_ttl(), Duration::from_secs(DEFAULT_REBUILD_TTL_SECS));
    }
}
