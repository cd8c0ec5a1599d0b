//! Bounded-parallel chunk dispatch.
//!
//! Every chunk gets its own task. A semaphore caps how many call out at
//! once, and the breaker gates every attempt. When the breaker opens, the
//! shared cancellation token stops tasks that have not started yet; tasks
//! already calling out run to completion or to their timeout.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::analyzer::{AnalysisContext, AnalysisStrategy};
use crate::breaker::{CircuitOpenError, SharedBreaker};
use crate::config::types::DispatchConfig;
use crate::model::{Chunk, ChunkId, ChunkOutcome};

/// Terminal per-chunk event reported back to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkDispatch {
    Finished {
        chunk_id: ChunkId,
        outcome: ChunkOutcome,
    },
    /// The breaker refused the call; nothing was sent.
    Rejected {
        chunk_id: ChunkId,
        error: CircuitOpenError,
    },
    /// Dropped before its first attempt because the dispatch was cancelled.
    Cancelled { chunk_id: ChunkId },
}

struct ChunkTask {
    chunk: Chunk,
    ctx: AnalysisContext,
    strategy: Arc<dyn AnalysisStrategy>,
    breaker: SharedBreaker,
    config: DispatchConfig,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl ChunkTask {
    async fn run(self) -> ChunkDispatch {
        let chunk_id = self.chunk.id;

        let _permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return ChunkDispatch::Cancelled { chunk_id },
            permit = Arc::clone(&self.semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return ChunkDispatch::Cancelled { chunk_id },
            },
        };

        let max_attempts = self.config.local_retries.saturating_add(1);
        let mut attempts = 0;
        let mut last_error = String::new();

        while attempts < max_attempts {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.acquire().await {
                Ok(()) => {}
                Err(Some(error)) => {
                    warn!(run_id = %self.ctx.run_id, chunk_id, error = %error, "Dispatch rejected by circuit breaker");
                    self.cancel.cancel();
                    return ChunkDispatch::Rejected { chunk_id, error };
                }
                Err(None) => break,
            }

            attempts += 1;
            let mut ctx = self.ctx.clone();
            ctx.attempt = attempts;
            debug!(run_id = %ctx.run_id, chunk_id, attempt = attempts, bytes = self.chunk.len(), "Analyzing chunk");

            let (error, transient) = match tokio::time::timeout(
                self.config.chunk_timeout,
                self.strategy.analyze(&self.chunk, &ctx),
            )
            .await
            {
                Ok(Ok(result)) => {
                    self.breaker.record_success();
                    return ChunkDispatch::Finished {
                        chunk_id,
                        outcome: ChunkOutcome::Analyzed { result },
                    };
                }
                Ok(Err(e)) => (e.to_string(), e.is_transient()),
                Err(_) => (
                    format!("analysis timed out after {:?}", self.config.chunk_timeout),
                    true,
                ),
            };

            warn!(run_id = %ctx.run_id, chunk_id, attempt = attempts, error = %error, "Chunk analysis attempt failed");
            last_error = error;

            if self.breaker.record_failure() {
                self.cancel.cancel();
                break;
            }
            if !transient {
                break;
            }

            if attempts < max_attempts {
                let backoff = self.config.retry_backoff.saturating_mul(attempts);
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }

        if attempts == 0 {
            return ChunkDispatch::Cancelled { chunk_id };
        }
        ChunkDispatch::Finished {
            chunk_id,
            outcome: ChunkOutcome::Failed {
                reason: last_error,
                attempts,
            },
        }
    }

    /// Passes the breaker gate. A half-open trial owned by another task is
    /// waited out rather than treated as a rejection. `Err(None)` means the
    /// round was cancelled while waiting.
    async fn acquire(&self) -> Result<(), Option<CircuitOpenError>> {
        loop {
            match self.breaker.try_acquire() {
                Ok(()) => return Ok(()),
                Err(CircuitOpenError::TrialInFlight) => {
                    debug!(run_id = %self.ctx.run_id, chunk_id = self.chunk.id, "Waiting for half-open trial");
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(None),
                        _ = self.breaker.trial_settled() => {}
                    }
                }
                Err(error) => return Err(Some(error)),
            }
        }
    }
}

/// One dispatch round over a set of chunks.
pub struct Dispatcher {
    tasks: JoinSet<ChunkDispatch>,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn spawn(
        chunks: Vec<Chunk>,
        ctx: AnalysisContext,
        strategy: Arc<dyn AnalysisStrategy>,
        breaker: SharedBreaker,
        config: &DispatchConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.workers.max(1)));
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();

        for chunk in chunks {
            let task = ChunkTask {
                chunk,
                ctx: ctx.clone(),
                strategy: Arc::clone(&strategy),
                breaker: breaker.clone(),
                config: config.clone(),
                semaphore: Arc::clone(&semaphore),
                cancel: cancel.clone(),
            };
            tasks.spawn(task.run());
        }

        Self { tasks, cancel }
    }

    /// Next terminal chunk event, in completion order. `None` once every task
    /// has reported.
    pub async fn next(&mut self) -> Option<ChunkDispatch> {
        loop {
            match self.tasks.join_next().await? {
                Ok(event) => return Some(event),
                // The chunk stays without a result; validation picks it up.
                Err(e) => warn!(error = %e, "Chunk dispatch task ended abnormally"),
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
