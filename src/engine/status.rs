use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::watch;

use crate::aggregator::aggregate;
use crate::breaker::BreakerStatus;
use crate::model::{
    AnalysisResult, Category, RunFailure, RunId, RunPhase, RunState, ValidationStatus,
};

/// Latest snapshot of every run this process has driven.
///
/// Each publish swaps in a whole new `Arc<RunState>`, so a reader holds either
/// the previous transition or the next one, never a mix. Snapshots carry no
/// log text; the board outlives the runs it reports on.
#[derive(Default)]
pub struct StatusBoard {
    runs: RwLock<HashMap<RunId, watch::Sender<Arc<RunState>>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, state: &RunState) {
        let snapshot = Arc::new(state.without_content());
        let mut runs = self.runs.write().unwrap_or_else(|p| p.into_inner());
        match runs.get(&state.run_id) {
            Some(sender) => {
                sender.send_replace(snapshot);
            }
            None => {
                let (sender, _) = watch::channel(snapshot);
                runs.insert(state.run_id.clone(), sender);
            }
        }
    }

    pub fn get(&self, run_id: &RunId) -> Option<Arc<RunState>> {
        let runs = self.runs.read().unwrap_or_else(|p| p.into_inner());
        runs.get(run_id).map(|sender| Arc::clone(&sender.borrow()))
    }

    /// Receiver that wakes on every published transition of the run.
    pub fn subscribe(&self, run_id: &RunId) -> Option<watch::Receiver<Arc<RunState>>> {
        let runs = self.runs.read().unwrap_or_else(|p| p.into_inner());
        runs.get(run_id).map(watch::Sender::subscribe)
    }
}

/// Answer to a run status query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStatus {
    pub run_id: RunId,
    pub state: RunPhase,
    pub category: Category,
    pub retry_count: u32,
    pub breaker_status: BreakerStatus,
    pub validation_status: ValidationStatus,
    pub checkpoint_version: u64,
    pub chunks_total: usize,
    pub chunks_done: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
    /// Aggregated result, or the merge of whatever chunks have finished.
    pub result: Option<AnalysisResult>,
}

impl RunStatus {
    pub fn from_state(state: &RunState) -> Self {
        let result = match &state.aggregated {
            Some(result) => Some(result.clone()),
            None if !state.chunk_results.is_empty() => Some(aggregate(
                &state.chunks,
                &state.chunk_results,
                state.category,
            )),
            None => None,
        };

        Self {
            run_id: state.run_id.clone(),
            state: state.phase,
            category: state.category,
            retry_count: state.retry_count,
            breaker_status: state.breaker.status,
            validation_status: state.validation_status,
            checkpoint_version: state.checkpoint_version,
            chunks_total: state.chunks.len(),
            chunks_done: state.chunk_results.len(),
            failure: state.failure.clone(),
            result,
        }
    }
}
