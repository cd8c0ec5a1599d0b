//! The run engine: bounded-parallel dispatch, the run state machine and the
//! board that publishes its snapshots.

pub mod controller;
pub mod dispatch;
pub mod status;

use serde::Serialize;
use std::collections::BTreeSet;
use thiserror::Error;

use crate::model::{AnalysisResult, Feature, RunFailure, RunId};
use crate::storage::{CheckpointError, StorageError};

pub use controller::RunController;
pub use dispatch::{ChunkDispatch, Dispatcher};
pub use status::{RunStatus, StatusBoard};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Run {run_id} already exists with different log content")]
    ContentMismatch { run_id: RunId },

    #[error("Run {0} not found")]
    NotFound(RunId),

    #[error("Run {0} is already being driven")]
    AlreadyRunning(RunId),

    #[error("Failed to compile categorizer signatures: {0}")]
    Categorizer(#[from] regex::Error),
}

/// Per-run capability flags supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub features: BTreeSet<Feature>,
    /// Used when `Feature::Interactive` is enabled.
    pub question: Option<String>,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed {
        result: AnalysisResult,
    },
    Failed {
        reason: RunFailure,
        /// Best result recoverable from the chunks that were analyzed.
        partial: AnalysisResult,
    },
}

impl RunOutcome {
    pub fn result(&self) -> &AnalysisResult {
        match self {
            RunOutcome::Completed { result } => result,
            RunOutcome::Failed { partial, .. } => partial,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }
}
