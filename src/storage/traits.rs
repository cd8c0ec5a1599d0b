use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::RunId;

/// One persisted snapshot of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointRecord {
    pub run_id: RunId,
    pub version: u64,
    /// Layout version of `state_json`.
    pub format_version: u32,
    pub state_json: String,
    pub created_at: DateTime<Utc>,
}

/// The log a run analyzes, stored once per run.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredLog {
    pub run_id: RunId,
    pub digest: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: RunId,
    pub latest_version: u64,
    pub saved_at: DateTime<Utc>,
}

/// Key-value store for run checkpoints: `run_id + version -> serialized state`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn init_schema(&self) -> Result<(), StorageError>;

    /// Writing the same `(run_id, version)` twice replaces the first write.
    async fn put(&self, record: &CheckpointRecord) -> Result<(), StorageError>;

    /// Highest version stored for the run.
    async fn latest(&self, run_id: &RunId) -> Result<Option<CheckpointRecord>, StorageError>;

    /// Deletes every version older than `keep_version`; returns how many went.
    async fn prune(&self, run_id: &RunId, keep_version: u64) -> Result<usize, StorageError>;

    async fn put_log(&self, log: &StoredLog) -> Result<(), StorageError>;

    async fn get_log(&self, run_id: &RunId) -> Result<Option<StoredLog>, StorageError>;

    async fn list_runs(&self) -> Result<Vec<RunSummary>, StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Database {path} is locked by process {pid}")]
    Locked { path: String, pid: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage task failed: {0}")]
    Join(String),
}

impl From<duckdb::Error> for StorageError {
    fn from(e: duckdb::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}
