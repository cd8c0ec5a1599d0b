use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::engine::RunController;

use super::api::{get_run, get_run_result, health_check, list_runs, start_run, AppState};

pub fn router(controller: Arc<RunController>) -> Router {
    let app_state = AppState { controller };

    Router::new()
        .route("/health", get(health_check))
        .route("/api/runs", get(list_runs).post(start_run))
        .route("/api/runs/:id", get(get_run))
        .route("/api/runs/:id/result", get(get_run_result))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Serve the HTTP API until `shutdown_rx` flips to `true`.
pub async fn run_server(
    controller: Arc<RunController>,
    listen: SocketAddr,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), std::io::Error> {
    let app = router(controller);

    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!(addr = %listen, "Web server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|&v| v).await;
            tracing::info!("Web server shutting down gracefully");
        })
        .await
}
