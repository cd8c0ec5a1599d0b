//! Category-specialized analysis strategies and the external collaborators
//! they wrap.

pub mod http;
pub mod inference;
pub mod rules;
pub mod search;
pub mod strategy;

use thiserror::Error;

pub use http::{HttpInference, HttpInferenceError};
pub use inference::{Inference, InferenceRequest};
pub use rules::RuleInference;
pub use search::{DocSearch, NoSearch, StaticDocIndex};
pub use strategy::{AnalysisContext, AnalysisStrategy, PromptedStrategy, StrategyTable};

/// Failure of an external collaborator call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    /// Worth retrying: timeouts, connection resets, overloaded backends.
    #[error("transient tool error: {0}")]
    Transient(String),

    #[error("fatal tool error: {0}")]
    Fatal(String),
}

impl ToolError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ToolError::Transient(_))
    }
}
