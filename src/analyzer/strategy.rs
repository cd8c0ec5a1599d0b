use async_trait::async_trait;
use std::fmt::Write as _;
use std::sync::Arc;

use super::inference::{Inference, InferenceRequest};
use super::search::DocSearch;
use super::ToolError;
use crate::model::{AnalysisResult, Category, Chunk, ResultMetadata, RunId};

/// Per-call context handed to a strategy alongside the chunk.
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    pub run_id: RunId,
    pub category: Category,
    pub chunk_count: usize,
    /// 1-based attempt number for this chunk within the current dispatch.
    pub attempt: u32,
    /// Why earlier results were rejected (memory feature).
    pub notes: Vec<String>,
    /// User question (interactive feature).
    pub question: Option<String>,
}

#[async_trait]
pub trait AnalysisStrategy: Send + Sync {
    fn category(&self) -> Category;

    async fn analyze(&self, chunk: &Chunk, ctx: &AnalysisContext)
        -> Result<AnalysisResult, ToolError>;
}

/// What differs between the category strategies: the prompt they send and
/// the topic they search documentation for.
#[derive(Debug, Clone, Copy)]
pub struct StrategyProfile {
    pub category: Category,
    pub log_source: &'static str,
    pub search_topic: &'static str,
    pub instructions: &'static str,
}

pub const HDFS_PROFILE: StrategyProfile = StrategyProfile {
    category: Category::Hdfs,
    log_source: "hdfs",
    search_topic: "hdfs",
    instructions: "You are analyzing Hadoop HDFS logs from NameNode and DataNode processes. \
        Focus on block replication, corrupt or missing blocks, DataNode liveness and NameNode safe mode.",
};

pub const SECURITY_PROFILE: StrategyProfile = StrategyProfile {
    category: Category::Security,
    log_source: "auth",
    search_topic: "security",
    instructions: "You are analyzing authentication and security logs (sshd, PAM, sudo). \
        Focus on failed logins, brute-force patterns, privilege escalation and unauthorized access.",
};

pub const APPLICATION_PROFILE: StrategyProfile = StrategyProfile {
    category: Category::Application,
    log_source: "application",
    search_topic: "application",
    instructions: "You are analyzing application logs. \
        Focus on exceptions and stack traces, failing requests, dependency errors and resource exhaustion.",
};

pub const GENERIC_PROFILE: StrategyProfile = StrategyProfile {
    category: Category::Generic,
    log_source: "generic",
    search_topic: "generic",
    instructions: "You are analyzing a log file of unknown origin. \
        Identify errors and anomalies, explain what the log shows, and suggest next steps.",
};

/// Strategy that prompts the inference collaborator and enriches the answer
/// with documentation references.
pub struct PromptedStrategy {
    profile: StrategyProfile,
    inference: Arc<dyn Inference>,
    search: Arc<dyn DocSearch>,
}

impl PromptedStrategy {
    pub fn new(
        profile: StrategyProfile,
        inference: Arc<dyn Inference>,
        search: Arc<dyn DocSearch>,
    ) -> Self {
        Self {
            profile,
            inference,
            search,
        }
    }

    pub fn build_prompt(&self, chunk: &Chunk, ctx: &AnalysisContext) -> String {
        let mut prompt = String::from(self.profile.instructions);
        let _ = write!(
            prompt,
            "\n\nThis is chunk {} of {} (bytes {}..{}).",
            chunk.id + 1,
            ctx.chunk_count,
            chunk.start_offset,
            chunk.end_offset
        );
        if chunk.truncated_to.is_some() {
            prompt.push_str(" The chunk is a single oversized line and has been truncated.");
        }
        if !ctx.notes.is_empty() {
            prompt.push_str("\n\nA previous analysis was rejected:");
            for note in &ctx.notes {
                let _ = write!(prompt, "\n- {}", note);
            }
        }
        if let Some(question) = &ctx.question {
            let _ = write!(prompt, "\n\nThe user asks: {}", question);
        }
        prompt.push_str(
            "\n\nRespond with issues (type, description, severity), explanations, \
             suggestions and diagnostic commands.",
        );
        prompt
    }
}

#[async_trait]
impl AnalysisStrategy for PromptedStrategy {
    fn category(&self) -> Category {
        self.profile.category
    }

    async fn analyze(
        &self,
        chunk: &Chunk,
        ctx: &AnalysisContext,
    ) -> Result<AnalysisResult, ToolError> {
        let request = InferenceRequest {
            prompt: self.build_prompt(chunk, ctx),
            content: Arc::clone(&chunk.content),
            category: ctx.category,
        };

        let partial = self.inference.infer(&request).await?;

        let mut query = String::from(self.profile.search_topic);
        for issue in &partial.issues {
            query.push(' ');
            query.push_str(&issue.issue_type);
        }
        let documentation_references = match self.search.search(&query).await {
            Ok(refs) => refs,
            Err(e) => {
                tracing::warn!(
                    run_id = %ctx.run_id,
                    chunk_id = chunk.id,
                    error = %e,
                    "Documentation search failed, continuing without references"
                );
                Vec::new()
            }
        };

        let mut result = AnalysisResult {
            issues: partial.issues,
            explanations: partial.explanations,
            suggestions: partial.suggestions,
            documentation_references,
            diagnostic_commands: partial.diagnostic_commands,
            metadata: ResultMetadata::default(),
        };
        let is_error = partial.is_error.unwrap_or(false) || result.has_error_issue();
        result.metadata = ResultMetadata {
            log_source: partial
                .log_source
                .unwrap_or_else(|| self.profile.log_source.to_string()),
            is_error,
            category: ctx.category.as_str().to_string(),
            severity: result.max_severity().as_str().to_string(),
            failed_chunks: Vec::new(),
        };

        Ok(result)
    }
}

/// Exhaustive `category -> strategy` routing.
pub struct StrategyTable {
    hdfs: Arc<dyn AnalysisStrategy>,
    security: Arc<dyn AnalysisStrategy>,
    application: Arc<dyn AnalysisStrategy>,
    generic: Arc<dyn AnalysisStrategy>,
}

impl StrategyTable {
    pub fn new(inference: Arc<dyn Inference>, search: Arc<dyn DocSearch>) -> Self {
        let build = |profile: StrategyProfile| -> Arc<dyn AnalysisStrategy> {
            Arc::new(PromptedStrategy::new(
                profile,
                Arc::clone(&inference),
                Arc::clone(&search),
            ))
        };

        Self {
            hdfs: build(HDFS_PROFILE),
            security: build(SECURITY_PROFILE),
            application: build(APPLICATION_PROFILE),
            generic: build(GENERIC_PROFILE),
        }
    }

    /// Replaces the strategy serving `category`. `Unknown` shares the generic slot.
    pub fn with_strategy(mut self, category: Category, strategy: Arc<dyn AnalysisStrategy>) -> Self {
        match category {
            Category::Hdfs => self.hdfs = strategy,
            Category::Security => self.security = strategy,
            Category::Application => self.application = strategy,
            Category::Generic | Category::Unknown => self.generic = strategy,
        }
        self
    }

    pub fn for_category(&self, category: Category) -> Arc<dyn AnalysisStrategy> {
        let strategy = match category {
            Category::Hdfs => &self.hdfs,
            Category::Security => &self.security,
            Category::Application => &self.application,
            Category::Generic | Category::Unknown => &self.generic,
        };
        Arc::clone(strategy)
    }
}
