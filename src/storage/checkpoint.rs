use super::traits::{CheckpointRecord, CheckpointStore, StorageError, StoredLog};
use crate::model::{RunId, RunState};
use chrono::Utc;
use std::sync::Arc;

/// Layout version of serialized `RunState` snapshots.
pub const CURRENT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to serialize run state: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Checkpoint format {found} is not supported (expected {expected})")]
    UnsupportedFormat { found: u32, expected: u32 },

    #[error("Checkpoint for run {0} has no stored log content")]
    MissingLog(RunId),
}

pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Handle to one durable snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRef {
    pub run_id: RunId,
    pub version: u64,
}

pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Persists `state` as the next version and bumps `state.checkpoint_version`.
    ///
    /// The version is only advanced once the write succeeded, so a failed save
    /// leaves `state` untouched. Older versions of the run are pruned afterwards.
    pub async fn save(&self, state: &mut RunState) -> Result<CheckpointRef> {
        if state.checkpoint_version == 0 {
            self.store
                .put_log(&StoredLog {
                    run_id: state.run_id.clone(),
                    digest: state.content_digest.clone(),
                    content: state.log_content.to_string(),
                })
                .await?;
        }

        let version = state.checkpoint_version + 1;
        state.checkpoint_version = version;
        let state_json = match serde_json::to_string(&*state) {
            Ok(json) => json,
            Err(e) => {
                state.checkpoint_version = version - 1;
                return Err(e.into());
            }
        };

        let record = CheckpointRecord {
            run_id: state.run_id.clone(),
            version,
            format_version: CURRENT_VERSION,
            state_json,
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.put(&record).await {
            state.checkpoint_version = version - 1;
            return Err(e.into());
        }

        match self.store.prune(&state.run_id, version).await {
            Ok(removed) if removed > 0 => {
                tracing::debug!(run_id = %state.run_id, version, removed, "Pruned superseded checkpoints");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(run_id = %state.run_id, version, error = %e, "Failed to prune old checkpoints");
            }
        }

        tracing::debug!(run_id = %state.run_id, version, phase = %state.phase, "Checkpoint saved");
        Ok(CheckpointRef {
            run_id: state.run_id.clone(),
            version,
        })
    }

    /// Reconstructs the run as of its last durable save.
    pub async fn load(&self, run_id: &RunId) -> Result<Option<RunState>> {
        let Some(record) = self.store.latest(run_id).await? else {
            tracing::debug!(run_id = %run_id, "No checkpoint found");
            return Ok(None);
        };

        if record.format_version != CURRENT_VERSION {
            return Err(CheckpointError::UnsupportedFormat {
                found: record.format_version,
                expected: CURRENT_VERSION,
            });
        }

        let mut state: RunState = serde_json::from_str(&record.state_json)?;
        let log = self
            .store
            .get_log(run_id)
            .await?
            .ok_or_else(|| CheckpointError::MissingLog(run_id.clone()))?;
        state.rehydrate(Arc::from(log.content));
        state.checkpoint_version = record.version;

        tracing::info!(
            run_id = %run_id,
            version = record.version,
            phase = %state.phase,
            "Loaded checkpoint"
        );
        Ok(Some(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitBreakerState;
    use crate::config::types::BreakerConfig;
    use crate::model::{AnalysisResult, Chunk, ChunkOutcome, RunPhase};
    use crate::storage::duckdb::DuckDbStore;
    use std::collections::BTreeSet;

    async fn setup() -> (Arc<dyn CheckpointStore>, CheckpointManager) {
        let store = DuckDbStore::in_memory().unwrap();
        store.init_schema().await.unwrap();
        let store = Arc::new(store) as Arc<dyn CheckpointStore>;
        (store.clone(), CheckpointManager::new(store))
    }

    fn state() -> RunState {
        let log = "first line\nsecond line\n";
        let mut state = RunState::new(
            RunId::from("run-7"),
            Arc::from(log),
            BTreeSet::new(),
            None,
            2,
            CircuitBreakerState::new(&BreakerConfig::default()),
        );
        state.chunks = vec![
            Chunk {
                id: 0,
                start_offset: 0,
                end_offset: 11,
                truncated_to: None,
                content: Arc::from("first line\n"),
            },
            Chunk {
                id: 1,
                start_offset: 11,
                end_offset: 23,
                truncated_to: None,
                content: Arc::from("second line\n"),
            },
        ];
        state
    }

    #[tokio::test]
    async fn test_save_increments_version() {
        let (store, manager) = setup().await;
        let mut state = state();

        let first = manager.save(&mut state).await.unwrap();
        let second = manager.save(&mut state).await.unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(state.checkpoint_version, 2);

        // superseded versions are pruned
        assert_eq!(store.prune(&state.run_id, 2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_load_reconstructs_state() {
        let (_, manager) = setup().await;
        let mut state = state();
        state.phase = RunPhase::Dispatching;
        state.chunk_results.insert(
            0,
            ChunkOutcome::Analyzed {
                result: AnalysisResult::default(),
            },
        );
        manager.save(&mut state).await.unwrap();

        let loaded = manager.load(&state.run_id).await.unwrap().unwrap();
        assert_eq!(loaded.phase, RunPhase::Dispatching);
        assert_eq!(loaded.checkpoint_version, 1);
        assert_eq!(&*loaded.log_content, "first line\nsecond line\n");
        assert_eq!(&*loaded.chunks[1].content, "second line\n");
        assert_eq!(loaded.chunk_results, state.chunk_results);
        assert_eq!(loaded.undispatched_chunks(), vec![1]);
    }

    #[tokio::test]
    async fn test_load_missing_run() {
        let (_, manager) = setup().await;
        assert!(manager.load(&RunId::from("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unsupported_format_is_an_error() {
        let (store, manager) = setup().await;
        let mut state = state();
        manager.save(&mut state).await.unwrap();

        store
            .put(&CheckpointRecord {
                run_id: state.run_id.clone(),
                version: 2,
                format_version: 999,
                state_json: "{}".to_string(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let err = manager.load(&state.run_id).await.unwrap_err();
        assert!(matches!(
            err,
            CheckpointError::UnsupportedFormat { found: 999, expected: CURRENT_VERSION }
        ));
    }
}
