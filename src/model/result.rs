use serde::{Deserialize, Serialize};
use std::fmt;

use super::state::ChunkId;

/// Issue severity as it appears in the output contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(rename = "type")]
    pub issue_type: String,
    pub description: String,
    pub severity: Severity,
}

impl Issue {
    pub fn new(issue_type: impl Into<String>, description: impl Into<String>, severity: Severity) -> Self {
        Self {
            issue_type: issue_type.into(),
            description: description.into(),
            severity,
        }
    }

    /// Identity used when merging results from several chunks.
    pub fn dedup_key(&self) -> (String, String) {
        (
            self.issue_type.trim().to_string(),
            self.description.trim().to_string(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocReference {
    pub title: String,
    pub url: String,
    pub relevance: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticCommand {
    pub command: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub log_source: String,
    pub is_error: bool,
    pub category: String,
    pub severity: String,
    /// Chunks whose analysis terminally failed and were left out of the merge.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_chunks: Vec<ChunkId>,
}

/// The output contract consumed by the CLI and the HTTP API.
///
/// Every list is required on the wire; an empty list is valid, an absent one
/// is not.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub issues: Vec<Issue>,
    pub explanations: Vec<String>,
    pub suggestions: Vec<String>,
    pub documentation_references: Vec<DocReference>,
    pub diagnostic_commands: Vec<DiagnosticCommand>,
    pub metadata: ResultMetadata,
}

impl AnalysisResult {
    pub fn has_error_issue(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Error)
    }

    /// Highest severity across issues, `Info` when there are none.
    pub fn max_severity(&self) -> Severity {
        self.issues
            .iter()
            .map(|i| i.severity)
            .max()
            .unwrap_or(Severity::Info)
    }
}

/// What an inference collaborator hands back for one chunk.
///
/// Everything is optional; strategies fill the gaps before the result enters
/// the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialAnalysis {
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub explanations: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub diagnostic_commands: Vec<DiagnosticCommand>,
    #[serde(default)]
    pub log_source: Option<String>,
    #[serde(default)]
    pub is_error: Option<bool>,
}
