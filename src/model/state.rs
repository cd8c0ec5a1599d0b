use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use super::result::AnalysisResult;
use crate::breaker::CircuitBreakerState;

pub type ChunkId = u32;

/// Opaque identifier of one analysis run, also the checkpoint key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Hdfs,
    Security,
    Application,
    Generic,
    Unknown,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Hdfs => "hdfs",
            Category::Security => "security",
            Category::Application => "application",
            Category::Generic => "generic",
            Category::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional capabilities enabled for a run. Fixed once the run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feature {
    Streaming,
    Memory,
    Interactive,
}

impl std::str::FromStr for Feature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "streaming" => Ok(Feature::Streaming),
            "memory" => Ok(Feature::Memory),
            "interactive" => Ok(Feature::Interactive),
            other => Err(format!("unknown feature: {}", other)),
        }
    }
}

/// Notes carried between attempts when the memory feature is on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractiveRecord {
    pub question: String,
}

fn empty_content() -> Arc<str> {
    Arc::from("")
}

/// A contiguous, line-aligned slice of the run's log content.
///
/// Only offsets are persisted; `content` is rebuilt from the log after a
/// checkpoint is loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub start_offset: usize,
    pub end_offset: usize,
    /// Set when an oversized line was cut down to this many bytes for analysis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncated_to: Option<usize>,
    #[serde(skip, default = "empty_content")]
    pub content: Arc<str>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.end_offset - self.start_offset
    }

    pub fn is_empty(&self) -> bool {
        self.start_offset == self.end_offset
    }

    /// Re-slices `content` out of the full log.
    pub fn rehydrate(&mut self, log: &str) {
        let end = match self.truncated_to {
            Some(limit) => self.start_offset + limit,
            None => self.end_offset,
        };
        self.content = Arc::from(&log[self.start_offset..end]);
    }
}

/// Per-chunk entry in `chunk_results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChunkOutcome {
    Analyzed { result: AnalysisResult },
    Failed { reason: String, attempts: u32 },
}

impl ChunkOutcome {
    pub fn result(&self) -> Option<&AnalysisResult> {
        match self {
            ChunkOutcome::Analyzed { result } => Some(result),
            ChunkOutcome::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ChunkOutcome::Failed { .. })
    }
}

/// Where a run currently is. A persisted phase names the next step to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Start,
    Categorizing,
    Chunking,
    Dispatching,
    Aggregating,
    Validating,
    Retrying,
    Completed,
    Failed,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Start => "start",
            RunPhase::Categorizing => "categorizing",
            RunPhase::Chunking => "chunking",
            RunPhase::Dispatching => "dispatching",
            RunPhase::Aggregating => "aggregating",
            RunPhase::Validating => "validating",
            RunPhase::Retrying => "retrying",
            RunPhase::Completed => "completed",
            RunPhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Completed | RunPhase::Failed)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Pending,
    Valid,
    NeedsRetry,
    Failed,
}

/// Why a run ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunFailure {
    #[error("line {line} is {length} bytes, over the {limit} byte chunk limit")]
    OversizedLine {
        line: usize,
        length: usize,
        limit: usize,
    },

    #[error("circuit breaker open: {reason}")]
    CircuitOpen { reason: String },

    #[error("analysis result failed schema validation: {}", .problems.join("; "))]
    Schema { problems: Vec<String> },

    #[error("validation still failing after {retries} retries: {}", .reasons.join("; "))]
    RetriesExhausted { retries: u32, reasons: Vec<String> },
}

/// The single mutable record of one run.
///
/// Owned by the run controller. Every transition produces a new value that
/// replaces the previous snapshot wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: RunId,
    /// Stored once per run next to the checkpoints, not inside each snapshot.
    #[serde(skip, default = "empty_content")]
    pub log_content: Arc<str>,
    /// SHA-256 of `log_content`, hex encoded.
    pub content_digest: String,
    pub category: Category,
    pub features: BTreeSet<Feature>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interactive: Option<InteractiveRecord>,
    pub chunks: Vec<Chunk>,
    pub chunk_results: BTreeMap<ChunkId, ChunkOutcome>,
    pub aggregated: Option<AnalysisResult>,
    pub validation_status: ValidationStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Chunks implicated by the last validation, re-dispatched while `Retrying`.
    #[serde(default)]
    pub retry_targets: BTreeSet<ChunkId>,
    pub breaker: CircuitBreakerState,
    pub phase: RunPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
    pub checkpoint_version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunState {
    pub fn new(
        run_id: RunId,
        log_content: Arc<str>,
        mut features: BTreeSet<Feature>,
        question: Option<String>,
        max_retries: u32,
        breaker: CircuitBreakerState,
    ) -> Self {
        let memory = features
            .contains(&Feature::Memory)
            .then(MemoryRecord::default);
        // Interactive mode has nothing to ask without a question.
        let interactive = if features.contains(&Feature::Interactive) {
            question.map(|question| InteractiveRecord { question })
        } else {
            None
        };
        if interactive.is_none() {
            features.remove(&Feature::Interactive);
        }
        let now = Utc::now();

        Self {
            run_id,
            content_digest: content_digest(&log_content),
            log_content,
            category: Category::Unknown,
            features,
            memory,
            interactive,
            chunks: Vec::new(),
            chunk_results: BTreeMap::new(),
            aggregated: None,
            validation_status: ValidationStatus::Pending,
            retry_count: 0,
            max_retries,
            retry_targets: BTreeSet::new(),
            breaker,
            phase: RunPhase::Start,
            failure: None,
            checkpoint_version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Copy of the state with the log text and chunk contents dropped.
    /// Offsets, outcomes and results are kept.
    pub fn without_content(&self) -> RunState {
        let mut copy = self.clone();
        copy.log_content = empty_content();
        for chunk in &mut copy.chunks {
            chunk.content = empty_content();
        }
        copy
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Chunks that have no entry in `chunk_results` yet.
    pub fn undispatched_chunks(&self) -> Vec<ChunkId> {
        self.chunks
            .iter()
            .map(|c| c.id)
            .filter(|id| !self.chunk_results.contains_key(id))
            .collect()
    }

    pub fn chunk(&self, id: ChunkId) -> Option<&Chunk> {
        self.chunks.iter().find(|c| c.id == id)
    }

    pub fn failed_chunk_ids(&self) -> Vec<ChunkId> {
        self.chunk_results
            .iter()
            .filter(|(_, outcome)| outcome.is_failed())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Reattaches the log and rebuilds chunk contents after deserialization.
    pub fn rehydrate(&mut self, log: Arc<str>) {
        for chunk in &mut self.chunks {
            chunk.rehydrate(&log);
        }
        self.log_content = log;
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

pub fn content_digest(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::BreakerConfig;
    use crate::model::result::Issue;
    use crate::model::Severity;

    fn make_state(features: &[Feature], question: Option<&str>) -> RunState {
        RunState::new(
            RunId::from("run-1"),
            Arc::from("line one\nline two\n"),
            features.iter().copied().collect(),
            question.map(str::to_string),
            2,
            CircuitBreakerState::new(&BreakerConfig::default()),
        )
    }

    #[test]
    fn test_feature_sub_records() {
        let plain = make_state(&[], Some("why?"));
        assert!(plain.memory.is_none());
        assert!(plain.interactive.is_none());

        let full = make_state(&[Feature::Memory, Feature::Interactive], Some("why?"));
        assert_eq!(full.memory, Some(MemoryRecord::default()));
        assert_eq!(full.interactive.unwrap().question, "why?");
    }

    #[test]
    fn test_interactive_without_question_is_dropped() {
        let state = make_state(&[Feature::Memory, Feature::Interactive], None);
        assert!(state.interactive.is_none());
        assert!(!state.features.contains(&Feature::Interactive));
        assert!(state.features.contains(&Feature::Memory));
    }

    #[test]
    fn test_undispatched_chunks() {
        let mut state = make_state(&[], None);
        for id in 0..3 {
            state.chunks.push(Chunk {
                id,
                start_offset: 0,
                end_offset: 0,
                truncated_to: None,
                content: Arc::from(""),
            });
        }
        state.chunk_results.insert(
            1,
            ChunkOutcome::Failed {
                reason: "boom".to_string(),
                attempts: 3,
            },
        );
        assert_eq!(state.undispatched_chunks(), vec![0, 2]);
        assert_eq!(state.failed_chunk_ids(), vec![1]);
    }

    #[test]
    fn test_serde_round_trip_drops_and_restores_content() {
        let mut state = make_state(&[Feature::Streaming], None);
        state.chunks.push(Chunk {
            id: 0,
            start_offset: 0,
            end_offset: 9,
            truncated_to: None,
            content: Arc::from("line one\n"),
        });
        state.chunks.push(Chunk {
            id: 1,
            start_offset: 9,
            end_offset: 18,
            truncated_to: Some(4),
            content: Arc::from("line"),
        });
        let mut result = AnalysisResult::default();
        result.issues.push(Issue::new("t", "d", Severity::Info));
        state
            .chunk_results
            .insert(0, ChunkOutcome::Analyzed { result });

        let json = serde_json::to_string(&state).unwrap();
        assert!(!json.contains("\"content\""));
        assert!(!json.contains("line one"));

        let mut loaded: RunState = serde_json::from_str(&json).unwrap();
        assert_eq!(&*loaded.chunks[0].content, "");
        assert!(loaded.log_content.is_empty());
        loaded.rehydrate(Arc::clone(&state.log_content));
        assert_eq!(&*loaded.log_content, "line one\nline two\n");
        assert_eq!(&*loaded.chunks[0].content, "line one\n");
        assert_eq!(&*loaded.chunks[1].content, "line");
        assert_eq!(loaded.chunk_results, state.chunk_results);
        assert_eq!(loaded.content_digest, state.content_digest);
    }

    #[test]
    fn test_content_digest_is_stable() {
        assert_eq!(content_digest("abc"), content_digest("abc"));
        assert_ne!(content_digest("abc"), content_digest("abd"));
        assert_eq!(content_digest("").len(), 64);
    }

    #[test]
    fn test_feature_from_str() {
        assert_eq!("Memory".parse::<Feature>().unwrap(), Feature::Memory);
        assert!("telepathy".parse::<Feature>().is_err());
    }
}
