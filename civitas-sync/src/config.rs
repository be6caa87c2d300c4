//! Sync scheduler configuration

use std::path::PathBuf;
use std::sync::Arc;

use civitas_core::constants::{DEFAULT_SYNC_TIME, DEFAULT_SYNC_TIMEZONE};
use civitas_core::{env_flag, CivitasResult};

use crate::import::{CommandPipeline, ImportPipeline, NoopPipeline};
use crate::trigger::DailyTrigger;

/// External import command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl ImportCommand {
    pub fn pipeline(&self) -> CommandPipeline {
        let pipeline = CommandPipeline::new(self.program.clone()).with_args(self.args.clone());
        match &self.working_dir {
            Some(dir) => pipeline.with_working_dir(dir.clone()),
            None => pipeline,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Local trigger time, `HH:MM`
    pub trigger_time: String,
    /// IANA timezone name
    pub timezone: String,
    /// Reject a run while another one is in progress
    pub exclusive_runs: bool,
    /// Import command; `None` skips the import step
    pub import: Option<ImportCommand>,
    /// Rebuild at startup when the cache is stale
    pub rebuild_on_start: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            trigger_time: DEFAULT_SYNC_TIME.to_string(),
            timezone: DEFAULT_SYNC_TIMEZONE.to_string(),
            exclusive_runs: false,
            import: None,
            rebuild_on_start: true,
        }
    }
}

impl SyncConfig {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `CIVITAS_SYNC_TIME`: daily trigger (default: 07:00)
    /// - `CIVITAS_SYNC_TIMEZONE`: trigger timezone (default: America/Sao_Paulo)
    /// - `CIVITAS_SYNC_EXCLUSIVE`: reject overlapping runs (default: false)
    /// - `CIVITAS_IMPORT_COMMAND`: import program (default: none)
    /// - `CIVITAS_IMPORT_ARGS`: whitespace-separated arguments
    /// - `CIVITAS_IMPORT_DIR`: working directory for the import program
    /// - `CIVITAS_SYNC_ON_START`: rebuild at startup when stale (default: true)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let import = std::env::var("CIVITAS_IMPORT_COMMAND")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(|program| ImportCommand {
                program: program.trim().to_string(),
                args: std::env::var("CIVITAS_IMPORT_ARGS")
                    .map(|a| a.split_whitespace().map(str::to_string).collect())
                    .unwrap_or_default(),
                working_dir: std::env::var("CIVITAS_IMPORT_DIR").ok().map(PathBuf::from),
            });

        Self {
            trigger_time: std::env::var("CIVITAS_SYNC_TIME").unwrap_or(defaults.trigger_time),
            timezone: std::env::var("CIVITAS_SYNC_TIMEZONE").unwrap_or(defaults.timezone),
            exclusive_runs: env_flag("CIVITAS_SYNC_EXCLUSIVE", defaults.exclusive_runs),
            import,
            rebuild_on_start: env_flag("CIVITAS_SYNC_ON_START", defaults.rebuild_on_start),
        }
    }

    /// No import step, overlapping runs rejected, no startup rebuild.
    pub fn development() -> Self {
        Self {
            exclusive_runs: true,
            rebuild_on_start: false,
            ..Self::default()
        }
    }

    pub fn with_import(mut self, import: ImportCommand) -> Self {
        self.import = Some(import);
        self
    }

    pub fn with_exclusive_runs(mut self, exclusive: bool) -> Self {
        self.exclusive_runs = exclusive;
        self
    }

    /// Parsed trigger.
    pub fn trigger(&self) -> CivitasResult<DailyTrigger> {
        Ok(DailyTrigger::parse(&self.trigger_time, &self.timezone)?)
    }

    /// The configured import pipeline, or a no-op one.
    pub fn pipeline(&self) -> Arc<dyn ImportPipeline> {
        match &self.import {
            Some(command) => Arc::new(command.pipeline()),
            None => Arc::new(NoopPipeline),
        }
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - trigger time and timezone parse
    /// - import program is non-empty when set
    pub fn validate(&self) -> CivitasResult<()> {
        self.trigger()?;
        if let Some(import) = &self.import {
            if import.program.trim().is_empty() {
                return Err(civitas_core::ConfigError::InvalidValue {
                    field: "import.program".to_string(),
                    value: import.program.clone(),
                    reason: "import program must not be empty".to_string(),
                }
                .into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use civitas_core::{CivitasError, ConfigError};

    #[test]
    fn test_default_is_valid() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.trigger_time, "07:00");
        assert_eq!(config.pipeline().describe(), "noop");
    }

    #[test]
    fn test_invalid_timezone() {
        let config = SyncConfig {
            timezone: "Nowhere/Special".to_string(),
            ..SyncConfig::default()
        };
        let err = config.validate().expect_err("timezone should be rejected");
        assert!(matches!(
            err,
            CivitasError::Config(ConfigError::InvalidValue { ref field, .. }) if field == "sync_timezone"
        ));
    }

    #[test]
    fn test_empty_import_program_rejected() {
        let config = SyncConfig::default().with_import(ImportCommand {
            program: " ".to_string(),
            args: vec![],
            working_dir: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_import_pipeline_describe() {
        let config = SyncConfig::development().with_import(ImportCommand {
            program: "node".to_string(),
            args: vec!["scripts/import.js".to_string()],
            working_dir: Some(PathBuf::from("/srv/import")),
        });
        assert!(config.exclusive_runs);
        assert_eq!(config.pipeline().describe(), "node scripts/import.js");
    }
}
