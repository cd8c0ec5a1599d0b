use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info};

use crate::engine::{EngineError, RunController, RunOptions, RunStatus};
use crate::model::{AnalysisResult, Feature, RunId};
use crate::storage::RunSummary;

/// Shared state for the web API
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<RunController>,
}

#[derive(Debug, Deserialize)]
pub struct StartRunRequest {
    /// Full log text to analyze.
    pub log: String,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub features: BTreeSet<Feature>,
    #[serde(default)]
    pub question: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StartRunResponse {
    pub run_id: RunId,
    pub status_url: String,
}

#[derive(Debug, Serialize)]
pub struct RunListEntry {
    pub run_id: RunId,
    pub checkpoint_version: u64,
    pub saved_at: chrono::DateTime<chrono::Utc>,
}

impl From<RunSummary> for RunListEntry {
    fn from(summary: RunSummary) -> Self {
        Self {
            run_id: summary.run_id,
            checkpoint_version: summary.latest_version,
            saved_at: summary.saved_at,
        }
    }
}

/// GET /health
pub async fn health_check() -> &'static str {
    "OK"
}

/// POST /api/runs
///
/// Starts the run in the background and answers immediately.
pub async fn start_run(
    State(state): State<AppState>,
    Json(request): Json<StartRunRequest>,
) -> Result<(StatusCode, Json<StartRunResponse>), ApiError> {
    if request.log.is_empty() {
        return Err(ApiError::BadRequest("log must not be empty".to_string()));
    }

    let run_id = request
        .run_id
        .map(RunId::new)
        .unwrap_or_else(RunId::generate);

    if let Some(snapshot) = state.controller.board().get(&run_id) {
        if !snapshot.is_terminal() {
            return Err(ApiError::Conflict(format!("run {} is in progress", run_id)));
        }
    }

    let options = RunOptions {
        features: request.features,
        question: request.question,
    };
    let log: Arc<str> = Arc::from(request.log);
    let controller = Arc::clone(&state.controller);
    let spawned_id = run_id.clone();

    tokio::spawn(async move {
        match controller.start(spawned_id.clone(), log, options).await {
            Ok(outcome) => {
                info!(run_id = %spawned_id, completed = outcome.is_completed(), "Background run finished");
            }
            Err(e) => error!(run_id = %spawned_id, error = %e, "Background run failed"),
        }
    });

    let status_url = format!("/api/runs/{}", run_id);
    Ok((
        StatusCode::ACCEPTED,
        Json(StartRunResponse { run_id, status_url }),
    ))
}

/// GET /api/runs
pub async fn list_runs(State(state): State<AppState>) -> Result<Json<Vec<RunListEntry>>, ApiError> {
    let runs = state.controller.list_runs().await?;
    Ok(Json(runs.into_iter().map(RunListEntry::from).collect()))
}

/// GET /api/runs/:id
pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RunStatus>, ApiError> {
    let run_id = RunId::new(id);
    match state.controller.status(&run_id).await? {
        Some(status) => Ok(Json(status)),
        None => Err(ApiError::NotFound(format!("run {} not found", run_id))),
    }
}

/// GET /api/runs/:id/result
///
/// The result document once the run is terminal. Failed runs answer with
/// their partial result; the failure reason is on `GET /api/runs/:id`.
pub async fn get_run_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AnalysisResult>, ApiError> {
    let run_id = RunId::new(id);
    let status = state
        .controller
        .status(&run_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("run {} not found", run_id)))?;

    match status.result {
        Some(result) if status.state.is_terminal() => Ok(Json(result)),
        _ => Err(ApiError::NotFound(format!(
            "run {} has no result yet (state: {})",
            run_id, status.state
        ))),
    }
}

// Error handling
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    InternalError(String),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NotFound(_) => ApiError::NotFound(e.to_string()),
            EngineError::AlreadyRunning(_) | EngineError::ContentMismatch { .. } => {
                ApiError::Conflict(e.to_string())
            }
            _ => ApiError::InternalError(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
