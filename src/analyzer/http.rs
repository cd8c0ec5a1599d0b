//! Inference over HTTP: POSTs the request as JSON and expects a
//! `PartialAnalysis` JSON document back.

use async_trait::async_trait;
use reqwest::StatusCode;

use super::inference::{Inference, InferenceRequest};
use super::ToolError;
use crate::config::types::InferenceConfig;
use crate::model::PartialAnalysis;

#[derive(Debug, thiserror::Error)]
pub enum HttpInferenceError {
    #[error("inference.endpoint is not set")]
    MissingEndpoint,

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

pub struct HttpInference {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpInference {
    pub fn new(config: &InferenceConfig) -> Result<Self, HttpInferenceError> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or(HttpInferenceError::MissingEndpoint)?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
        })
    }
}

fn classify_status(status: StatusCode, body: &str) -> ToolError {
    let message = format!("inference backend returned {}: {}", status, body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        ToolError::Transient(message)
    } else {
        ToolError::Fatal(message)
    }
}

fn classify_transport(err: reqwest::Error) -> ToolError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        ToolError::Transient(err.to_string())
    } else {
        ToolError::Fatal(err.to_string())
    }
}

#[async_trait]
impl Inference for HttpInference {
    async fn infer(&self, request: &InferenceRequest) -> Result<PartialAnalysis, ToolError> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(classify_transport)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let bytes = response.bytes().await.map_err(classify_transport)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ToolError::Fatal(format!("malformed inference response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::InferenceBackend;
    use crate::model::Category;
    use axum::{extract::State, http::HeaderMap, routing::post, Json, Router};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/infer", addr)
    }

    fn config(endpoint: String, api_key: Option<&str>) -> InferenceConfig {
        InferenceConfig {
            backend: InferenceBackend::Http,
            endpoint: Some(endpoint),
            api_key: api_key.map(String::from),
            timeout: Duration::from_secs(5),
        }
    }

    fn request() -> InferenceRequest {
        InferenceRequest {
            prompt: "analyze".to_string(),
            content: Arc::from("ERROR boom\n"),
            category: Category::Generic,
        }
    }

    #[tokio::test]
    async fn test_success_parses_partial() {
        async fn handler(headers: HeaderMap, Json(body): Json<serde_json::Value>) -> Json<serde_json::Value> {
            assert_eq!(body["category"], "generic");
            assert_eq!(body["content"], "ERROR boom\n");
            let auth = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            Json(serde_json::json!({
                "issues": [{"type": "boom", "description": auth, "severity": "error"}],
                "suggestions": ["defuse"],
                "is_error": true
            }))
        }
        let url = serve(Router::new().route("/infer", post(handler))).await;
        let inference = HttpInference::new(&config(url, Some("s3cret"))).unwrap();

        let partial = inference.infer(&request()).await.unwrap();
        assert_eq!(partial.issues[0].issue_type, "boom");
        assert_eq!(partial.issues[0].description, "Bearer s3cret");
        assert_eq!(partial.suggestions, vec!["defuse".to_string()]);
        assert_eq!(partial.is_error, Some(true));
    }

    #[tokio::test]
    async fn test_status_classification() {
        async fn handler(State(code): State<u16>) -> (axum::http::StatusCode, &'static str) {
            (axum::http::StatusCode::from_u16(code).unwrap(), "nope")
        }

        for (code, transient) in [(503u16, true), (429, true), (400, false), (401, false)] {
            let router = Router::new()
                .route("/infer", post(handler))
                .with_state(code);
            let url = serve(router).await;
            let inference = HttpInference::new(&config(url, None)).unwrap();
            let err = inference.infer(&request()).await.unwrap_err();
            assert_eq!(err.is_transient(), transient, "status {}", code);
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_fatal() {
        async fn handler() -> &'static str {
            "not json"
        }
        let url = serve(Router::new().route("/infer", post(handler))).await;
        let inference = HttpInference::new(&config(url, None)).unwrap();
        let err = inference.infer(&request()).await.unwrap_err();
        assert!(matches!(err, ToolError::Fatal(_)));
    }

    #[tokio::test]
    async fn test_unreachable_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let inference = HttpInference::new(&config(format!("http://{}/infer", addr), None)).unwrap();
        let err = inference.infer(&request()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_missing_endpoint() {
        let cfg = InferenceConfig::default();
        assert!(matches!(
            HttpInference::new(&cfg),
            Err(HttpInferenceError::MissingEndpoint)
        ));
    }
}
