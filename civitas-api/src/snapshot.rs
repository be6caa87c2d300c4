//! Record snapshot source.
//!
//! The import pipeline writes the full record set as a JSON array to a file.
//! [`SnapshotSource`] holds that file in memory and answers aggregate queries
//! from it; [`ReloadingPipeline`] re-reads the file after every successful
//! import so the rebuild that follows sees fresh data.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use civitas_core::{CivitasResult, ConfigError};
use civitas_sync::{AggregateQuery, AggregateSource, GroupCount, ImportPipeline, MemorySource, Record};

pub struct SnapshotSource {
    path: PathBuf,
    records: MemorySource,
}

impl SnapshotSource {
    /// Source over `path` with no records loaded yet.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: MemorySource::default(),
        }
    }

    /// Source over `path`, loaded now.
    pub async fn load(path: impl Into<PathBuf>) -> CivitasResult<Self> {
        let source = Self::empty(path);
        source.reload().await?;
        Ok(source)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Re-read the snapshot file. On error the previous records stay in place.
    /// Returns the number of records loaded.
    pub async fn reload(&self) -> CivitasResult<usize> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| ConfigError::Io {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        let records: Vec<Record> =
            serde_json::from_slice(&bytes).map_err(|e| ConfigError::Parse {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })?;

        let count = records.len();
        self.records.replace(records);
        tracing::info!(path = %self.path.display(), records = count, "Record snapshot loaded");
        Ok(count)
    }
}

impl std::fmt::Debug for SnapshotSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotSource")
            .field("path", &self.path)
            .field("records", &self.records.len())
            .finish()
    }
}

#[async_trait]
impl AggregateSource for SnapshotSource {
    async fn aggregate(&self, query: &AggregateQuery) -> CivitasResult<Vec<GroupCount>> {
        self.records.aggregate(query).await
    }
}

/// Runs an import, then reloads the snapshot it wrote.
pub struct ReloadingPipeline {
    import: Arc<dyn ImportPipeline>,
    snapshot: Arc<SnapshotSource>,
}

impl ReloadingPipeline {
    pub fn new(import: Arc<dyn ImportPipeline>, snapshot: Arc<SnapshotSource>) -> Self {
        Self { import, snapshot }
    }
}

#[async_trait]
impl ImportPipeline for ReloadingPipeline {
    fn describe(&self) -> String {
        format!(
            "{} then reload {}",
            self.import.describe(),
            self.snapshot.path().display()
        )
    }

    async fn run(&self) -> CivitasResult<()> {
        self.import.run().await?;
        self.snapshot.reload().await?;
        Ok(())
    }
}
