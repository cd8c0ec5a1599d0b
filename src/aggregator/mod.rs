//! Merges per-chunk results into one run-level `AnalysisResult`.
//!
//! Inputs are walked in chunk order, so the first chunk reporting a
//! duplicate wins regardless of the order chunks finished in. The merge is
//! a pure function of `(chunks, chunk_results, category)`.

use std::collections::{BTreeMap, HashSet};

use crate::model::{
    AnalysisResult, Category, Chunk, ChunkId, ChunkOutcome, ResultMetadata,
};

/// Keeps the first occurrence of each key.
struct Dedup<T, K> {
    seen: HashSet<K>,
    items: Vec<T>,
}

impl<T, K: std::hash::Hash + Eq> Dedup<T, K> {
    fn new() -> Self {
        Self {
            seen: HashSet::new(),
            items: Vec::new(),
        }
    }

    fn push(&mut self, key: K, item: T) {
        if self.seen.insert(key) {
            self.items.push(item);
        }
    }
}

pub fn aggregate(
    chunks: &[Chunk],
    chunk_results: &BTreeMap<ChunkId, ChunkOutcome>,
    category: Category,
) -> AnalysisResult {
    let mut issues = Dedup::new();
    let mut explanations = Dedup::new();
    let mut suggestions = Dedup::new();
    let mut references = Dedup::new();
    let mut commands = Dedup::new();
    let mut log_source: Option<String> = None;
    let mut reported_error = false;
    let mut failed_chunks = Vec::new();

    for chunk in chunks {
        let result = match chunk_results.get(&chunk.id) {
            Some(ChunkOutcome::Analyzed { result }) => result,
            Some(ChunkOutcome::Failed { .. }) => {
                failed_chunks.push(chunk.id);
                continue;
            }
            None => continue,
        };

        if log_source.is_none() && !result.metadata.log_source.is_empty() {
            log_source = Some(result.metadata.log_source.clone());
        }
        reported_error |= result.metadata.is_error;

        for issue in &result.issues {
            issues.push(issue.dedup_key(), issue.clone());
        }
        for text in &result.explanations {
            explanations.push(text.clone(), text.clone());
        }
        for text in &result.suggestions {
            suggestions.push(text.clone(), text.clone());
        }
        for reference in &result.documentation_references {
            references.push(reference.url.clone(), reference.clone());
        }
        for command in &result.diagnostic_commands {
            commands.push(command.command.clone(), command.clone());
        }
    }

    let mut merged = AnalysisResult {
        issues: issues.items,
        explanations: explanations.items,
        suggestions: suggestions.items,
        documentation_references: references.items,
        diagnostic_commands: commands.items,
        metadata: ResultMetadata::default(),
    };

    merged.metadata = ResultMetadata {
        log_source: log_source.unwrap_or_else(|| category.as_str().to_string()),
        is_error: reported_error || merged.has_error_issue(),
        category: category.as_str().to_string(),
        severity: merged.max_severity().as_str().to_string(),
        failed_chunks,
    };

    merged
}
