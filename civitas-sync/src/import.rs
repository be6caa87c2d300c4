//! Import pipeline runner.
//!
//! The import pipeline is an external program that refreshes the record store.
//! It runs to completion with inherited stdio; exit status 0 is success.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use civitas_core::{CivitasResult, SyncError};
use tokio::process::Command;

#[async_trait]
pub trait ImportPipeline: Send + Sync {
    /// Human-readable description for logs and status output.
    fn describe(&self) -> String;

    async fn run(&self) -> CivitasResult<()>;
}

/// Spawns a configured program and waits for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPipeline {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandPipeline {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl ImportPipeline for CommandPipeline {
    fn describe(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }

    async fn run(&self) -> CivitasResult<()> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        tracing::info!(command = %self.describe(), "Import pipeline started");
        let status = command.status().await.map_err(|e| SyncError::ImportSpawn {
            program: self.program.clone(),
            reason: e.to_string(),
        })?;

        if status.success() {
            tracing::info!(command = %self.describe(), "Import pipeline finished");
            Ok(())
        } else {
            tracing::error!(command = %self.describe(), code = ?status.code(), "Import pipeline failed");
            Err(SyncError::ImportFailed {
                code: status.code(),
            }
            .into())
        }
    }
}

/// Does nothing. Used when the record store is refreshed out of band.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPipeline;

#[async_trait]
impl ImportPipeline for NoopPipeline {
    fn describe(&self) -> String {
        "noop".to_string()
    }

    async fn run(&self) -> CivitasResult<()> {
        Ok(())
    }
}
