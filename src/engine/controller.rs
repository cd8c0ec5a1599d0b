use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

use super::dispatch::{ChunkDispatch, Dispatcher};
use super::status::{RunStatus, StatusBoard};
use super::{EngineError, RunOptions, RunOutcome};
use crate::aggregator::aggregate;
use crate::analyzer::{AnalysisContext, StrategyTable};
use crate::breaker::{CircuitBreakerState, SharedBreaker};
use crate::categorizer::Categorizer;
use crate::chunker::{categorization_sample, chunk_log};
use crate::config::Config;
use crate::model::{
    content_digest, ChunkId, ChunkOutcome, Feature, RunFailure, RunId, RunPhase, RunState,
    ValidationStatus,
};
use crate::storage::{CheckpointManager, RunSummary};
use crate::validator::{validate, Verdict};

/// Drives runs through the analysis state machine:
///
/// ```text
/// Start -> Categorizing -> Chunking -> Dispatching -> Aggregating -> Validating
///                                          ^                            |
///                                          +-------- Retrying <---------+--> Completed | Failed
/// ```
///
/// A persisted phase always names the next step to execute, so a run loaded
/// from a checkpoint continues exactly where it stopped.
pub struct RunController {
    config: Arc<Config>,
    strategies: Arc<StrategyTable>,
    categorizer: Categorizer,
    checkpoints: CheckpointManager,
    board: Arc<StatusBoard>,
    active: Mutex<HashSet<RunId>>,
}

/// Removes a run from the active set when driving ends, however it ends.
struct ActiveGuard<'a> {
    active: &'a Mutex<HashSet<RunId>>,
    run_id: RunId,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        active.remove(&self.run_id);
    }
}

impl RunController {
    pub fn new(
        config: Arc<Config>,
        strategies: StrategyTable,
        checkpoints: CheckpointManager,
    ) -> Result<Self, EngineError> {
        Ok(Self {
            config,
            strategies: Arc::new(strategies),
            categorizer: Categorizer::new()?,
            checkpoints,
            board: Arc::new(StatusBoard::new()),
            active: Mutex::new(HashSet::new()),
        })
    }

    pub fn board(&self) -> Arc<StatusBoard> {
        Arc::clone(&self.board)
    }

    /// Starts a run, or resumes it when a checkpoint for `run_id` exists.
    pub async fn start(
        &self,
        run_id: RunId,
        log: Arc<str>,
        options: RunOptions,
    ) -> Result<RunOutcome, EngineError> {
        let _guard = self.claim(&run_id)?;

        if let Some(existing) = self.checkpoints.load(&run_id).await? {
            if existing.content_digest != content_digest(&log) {
                return Err(EngineError::ContentMismatch { run_id });
            }
            info!(run_id = %run_id, phase = %existing.phase, "Resuming run from checkpoint");
            return self.drive(existing).await;
        }

        let state = RunState::new(
            run_id,
            log,
            options.features,
            options.question,
            self.config.validation.max_retries,
            CircuitBreakerState::new(&self.config.breaker),
        );
        info!(run_id = %state.run_id, bytes = state.log_content.len(), "Starting run");
        self.drive(state).await
    }

    /// Continues a checkpointed run. Terminal runs return their stored outcome.
    pub async fn resume(&self, run_id: &RunId) -> Result<RunOutcome, EngineError> {
        let _guard = self.claim(run_id)?;
        let state = self
            .checkpoints
            .load(run_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(run_id.clone()))?;
        info!(run_id = %run_id, phase = %state.phase, "Resuming run from checkpoint");
        self.drive(state).await
    }

    pub async fn status(&self, run_id: &RunId) -> Result<Option<RunStatus>, EngineError> {
        if let Some(snapshot) = self.board.get(run_id) {
            return Ok(Some(RunStatus::from_state(&snapshot)));
        }
        let state = self.checkpoints.load(run_id).await?;
        Ok(state.as_ref().map(RunStatus::from_state))
    }

    /// Runs with at least one checkpoint, newest first.
    pub async fn list_runs(&self) -> Result<Vec<RunSummary>, EngineError> {
        Ok(self.checkpoints.store().list_runs().await?)
    }

    fn claim(&self, run_id: &RunId) -> Result<ActiveGuard<'_>, EngineError> {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        if !active.insert(run_id.clone()) {
            return Err(EngineError::AlreadyRunning(run_id.clone()));
        }
        Ok(ActiveGuard {
            active: &self.active,
            run_id: run_id.clone(),
        })
    }

    async fn drive(&self, mut state: RunState) -> Result<RunOutcome, EngineError> {
        self.board.publish(&state);

        loop {
            match state.phase {
                RunPhase::Start => {
                    self.advance(&mut state, RunPhase::Categorizing).await?;
                }
                RunPhase::Categorizing => {
                    let sample = categorization_sample(&state.log_content, &self.config.chunking);
                    state.category = self.categorizer.categorize(sample);
                    info!(run_id = %state.run_id, category = %state.category, "Categorized log");
                    self.advance(&mut state, RunPhase::Chunking).await?;
                }
                RunPhase::Chunking => match chunk_log(&state.log_content, &self.config.chunking) {
                    Ok(chunks) => {
                        if state.log_content.len() as u64 > self.config.chunking.threshold {
                            state.features.insert(Feature::Streaming);
                        }
                        info!(run_id = %state.run_id, chunks = chunks.len(), "Chunked log");
                        state.chunks = chunks;
                        self.advance(&mut state, RunPhase::Dispatching).await?;
                    }
                    Err(e) => {
                        let failure = RunFailure::OversizedLine {
                            line: e.line,
                            length: e.length,
                            limit: e.limit,
                        };
                        self.fail(&mut state, failure).await?;
                    }
                },
                RunPhase::Dispatching => {
                    let targets = state.undispatched_chunks();
                    if let Some(reason) = self.dispatch(&mut state, targets).await? {
                        self.fail(&mut state, RunFailure::CircuitOpen { reason }).await?;
                    } else {
                        self.advance(&mut state, RunPhase::Aggregating).await?;
                    }
                }
                RunPhase::Aggregating => {
                    state.aggregated = Some(aggregate(
                        &state.chunks,
                        &state.chunk_results,
                        state.category,
                    ));
                    self.advance(&mut state, RunPhase::Validating).await?;
                }
                RunPhase::Validating => {
                    let aggregated = state.aggregated.clone().unwrap_or_else(|| {
                        aggregate(&state.chunks, &state.chunk_results, state.category)
                    });
                    match validate(&aggregated, &state) {
                        Verdict::Valid => {
                            state.validation_status = ValidationStatus::Valid;
                            state.retry_targets.clear();
                            self.advance(&mut state, RunPhase::Completed).await?;
                        }
                        Verdict::NeedsRetry { targets, reasons } => {
                            state.retry_count += 1;
                            state.validation_status = ValidationStatus::NeedsRetry;
                            warn!(
                                run_id = %state.run_id,
                                retry = state.retry_count,
                                max_retries = state.max_retries,
                                targets = ?targets,
                                reasons = ?reasons,
                                "Validation requested a narrowed retry"
                            );
                            if let Some(memory) = state.memory.as_mut() {
                                memory.notes.extend(reasons);
                            }
                            state.retry_targets = targets;
                            self.advance(&mut state, RunPhase::Retrying).await?;
                        }
                        Verdict::Failed(failure) => {
                            state.validation_status = ValidationStatus::Failed;
                            self.fail(&mut state, failure).await?;
                        }
                    }
                }
                RunPhase::Retrying => {
                    // Clearing the implicated results is what marks them for re-dispatch.
                    let targets: Vec<ChunkId> = state.retry_targets.iter().copied().collect();
                    for id in &targets {
                        state.chunk_results.remove(id);
                    }
                    state.aggregated = None;
                    self.advance(&mut state, RunPhase::Dispatching).await?;
                }
                RunPhase::Completed => {
                    let result = state.aggregated.clone().unwrap_or_default();
                    return Ok(RunOutcome::Completed { result });
                }
                RunPhase::Failed => {
                    let reason = state.failure.clone().unwrap_or(RunFailure::RetriesExhausted {
                        retries: state.retry_count,
                        reasons: Vec::new(),
                    });
                    let partial = state.aggregated.clone().unwrap_or_else(|| {
                        aggregate(&state.chunks, &state.chunk_results, state.category)
                    });
                    return Ok(RunOutcome::Failed { reason, partial });
                }
            }
        }
    }

    async fn advance(&self, state: &mut RunState, next: RunPhase) -> Result<(), EngineError> {
        info!(run_id = %state.run_id, from = %state.phase, to = %next, "Run transition");
        state.phase = next;
        self.commit(state).await
    }

    /// Ends the run, keeping whatever result the analyzed chunks produced.
    async fn fail(&self, state: &mut RunState, failure: RunFailure) -> Result<(), EngineError> {
        error!(run_id = %state.run_id, phase = %state.phase, reason = %failure, "Run failed");
        if state.aggregated.is_none() {
            state.aggregated = Some(aggregate(
                &state.chunks,
                &state.chunk_results,
                state.category,
            ));
        }
        state.failure = Some(failure);
        state.phase = RunPhase::Failed;
        self.commit(state).await
    }

    /// Persists the state as a new checkpoint version, then publishes it.
    async fn commit(&self, state: &mut RunState) -> Result<(), EngineError> {
        state.touch();
        if let Err(e) = self.checkpoints.save(state).await {
            if self.config.checkpoint.required {
                error!(run_id = %state.run_id, phase = %state.phase, error = %e, "Checkpoint write failed");
                self.board.publish(state);
                return Err(e.into());
            }
            warn!(run_id = %state.run_id, phase = %state.phase, error = %e, "Checkpoint write failed, continuing without it");
        }
        self.board.publish(state);
        Ok(())
    }

    /// Dispatches `targets` and records every outcome. Returns the reason the
    /// breaker stopped the round, if it did.
    async fn dispatch(
        &self,
        state: &mut RunState,
        targets: Vec<ChunkId>,
    ) -> Result<Option<String>, EngineError> {
        if targets.is_empty() {
            return Ok(None);
        }

        let chunks = targets
            .iter()
            .filter_map(|id| state.chunk(*id).cloned())
            .collect::<Vec<_>>();
        let ctx = AnalysisContext {
            run_id: state.run_id.clone(),
            category: state.category,
            chunk_count: state.chunks.len(),
            attempt: 1,
            notes: state
                .memory
                .as_ref()
                .map(|m| m.notes.clone())
                .unwrap_or_default(),
            question: state.interactive.as_ref().map(|i| i.question.clone()),
        };
        info!(
            run_id = %state.run_id,
            chunks = chunks.len(),
            workers = self.config.dispatch.workers,
            "Dispatching chunks"
        );

        let breaker = SharedBreaker::new(state.breaker.clone());
        let strategy = self.strategies.for_category(state.category);
        let mut dispatcher = Dispatcher::spawn(chunks, ctx, strategy, breaker.clone(), &self.config.dispatch);
        let mut rejection = None;

        while let Some(event) = dispatcher.next().await {
            match event {
                ChunkDispatch::Finished { chunk_id, outcome } => {
                    if let ChunkOutcome::Failed { reason, attempts } = &outcome {
                        warn!(run_id = %state.run_id, chunk_id, attempts, reason = %reason, "Chunk failed");
                    }
                    state.chunk_results.insert(chunk_id, outcome);
                    state.breaker = breaker.snapshot();
                    if self.config.checkpoint.per_chunk {
                        self.commit(state).await?;
                    } else {
                        state.touch();
                        self.board.publish(state);
                    }
                }
                ChunkDispatch::Rejected { error, .. } => {
                    rejection.get_or_insert_with(|| error.to_string());
                }
                ChunkDispatch::Cancelled { .. } => {}
            }
        }

        state.breaker = breaker.snapshot();
        if rejection.is_none() && (dispatcher.is_cancelled() || breaker.is_open()) {
            rejection = Some(format!(
                "opened after {} consecutive failures",
                state.breaker.consecutive_failures
            ));
        }
        Ok(rejection)
    }
}
