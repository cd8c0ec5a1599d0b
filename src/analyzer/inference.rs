use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use super::ToolError;
use crate::model::{Category, PartialAnalysis};

/// One inference call: a category-specific prompt over one chunk of log text.
#[derive(Debug, Clone, Serialize)]
pub struct InferenceRequest {
    pub prompt: String,
    pub content: Arc<str>,
    pub category: Category,
}

/// The semantic-analysis collaborator.
///
/// Implementations must be safe to call again with the same request; the
/// engine decides when to retry.
#[async_trait]
pub trait Inference: Send + Sync {
    async fn infer(&self, request: &InferenceRequest) -> Result<PartialAnalysis, ToolError>;
}
