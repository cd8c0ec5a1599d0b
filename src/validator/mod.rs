//! Completeness contract for aggregated results.
//!
//! Checks run in order: schema, non-triviality, chunk coverage. A schema
//! problem is terminal. The other two produce a narrowed retry while the run
//! still has retries left.

use std::collections::BTreeSet;
use thiserror::Error;

use crate::model::{
    AnalysisResult, Category, ChunkId, ChunkOutcome, RunFailure, RunState, Severity,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed analysis result: {}", .problems.join("; "))]
pub struct ValidationSchemaError {
    pub problems: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Valid,
    NeedsRetry {
        targets: BTreeSet<ChunkId>,
        reasons: Vec<String>,
    },
    Failed(RunFailure),
}

pub fn check_schema(result: &AnalysisResult, category: Category) -> Result<(), ValidationSchemaError> {
    let mut problems = Vec::new();

    for (i, issue) in result.issues.iter().enumerate() {
        if issue.issue_type.trim().is_empty() {
            problems.push(format!("issues[{}].type is empty", i));
        }
        if issue.description.trim().is_empty() {
            problems.push(format!("issues[{}].description is empty", i));
        }
    }
    for (i, reference) in result.documentation_references.iter().enumerate() {
        if reference.url.trim().is_empty() {
            problems.push(format!("documentation_references[{}].url is empty", i));
        }
    }
    for (i, command) in result.diagnostic_commands.iter().enumerate() {
        if command.command.trim().is_empty() {
            problems.push(format!("diagnostic_commands[{}].command is empty", i));
        }
    }

    let metadata = &result.metadata;
    if metadata.log_source.trim().is_empty() {
        problems.push("metadata.log_source is empty".to_string());
    }
    if metadata.category != category.as_str() {
        problems.push(format!(
            "metadata.category is '{}', run category is '{}'",
            metadata.category, category
        ));
    }
    let known = [Severity::Info, Severity::Warning, Severity::Error];
    if !known.iter().any(|s| s.as_str() == metadata.severity) {
        problems.push(format!("metadata.severity '{}' is not a known severity", metadata.severity));
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ValidationSchemaError { problems })
    }
}

/// Non-triviality problem for a result, if any.
fn triviality_problem(result: &AnalysisResult) -> Option<String> {
    if result.metadata.is_error {
        if result.issues.is_empty() {
            return Some("input classified as error but no issue was reported".to_string());
        }
        if result.suggestions.is_empty() {
            return Some("input classified as error but no suggestion was given".to_string());
        }
        None
    } else if result.explanations.is_empty() {
        Some("no explanation was given for non-error input".to_string())
    } else {
        None
    }
}

pub fn validate(aggregated: &AnalysisResult, state: &RunState) -> Verdict {
    if let Err(e) = check_schema(aggregated, state.category) {
        return Verdict::Failed(RunFailure::Schema { problems: e.problems });
    }

    let mut targets = BTreeSet::new();
    let mut reasons = Vec::new();

    if let Some(problem) = triviality_problem(aggregated) {
        let analyzed: Vec<(ChunkId, &AnalysisResult)> = state
            .chunks
            .iter()
            .filter_map(|c| {
                state
                    .chunk_results
                    .get(&c.id)
                    .and_then(ChunkOutcome::result)
                    .map(|r| (c.id, r))
            })
            .collect();
        let at_fault: Vec<ChunkId> = analyzed
            .iter()
            .filter(|(_, r)| triviality_problem(r).is_some())
            .map(|(id, _)| *id)
            .collect();
        if at_fault.is_empty() {
            targets.extend(analyzed.iter().map(|(id, _)| *id));
        } else {
            targets.extend(at_fault);
        }
        reasons.push(problem);
    }

    for chunk in &state.chunks {
        match state.chunk_results.get(&chunk.id) {
            Some(ChunkOutcome::Analyzed { .. }) => {}
            Some(ChunkOutcome::Failed { reason, .. }) => {
                targets.insert(chunk.id);
                reasons.push(format!("chunk {} failed: {}", chunk.id, reason));
            }
            None => {
                targets.insert(chunk.id);
                reasons.push(format!("chunk {} has no result", chunk.id));
            }
        }
    }

    if reasons.is_empty() {
        return Verdict::Valid;
    }

    if state.retry_count < state.max_retries {
        Verdict::NeedsRetry { targets, reasons }
    } else {
        Verdict::Failed(RunFailure::RetriesExhausted {
            retries: state.retry_count,
            reasons,
        })
    }
}
