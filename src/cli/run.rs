use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

use crate::analyzer::{
    DocSearch, HttpInference, HttpInferenceError, Inference, NoSearch, RuleInference,
    StaticDocIndex, StrategyTable,
};
use crate::config::types::{InferenceBackend, SearchBackend};
use crate::config::{Config, ConfigError};
use crate::engine::{EngineError, RunController, RunOptions, RunOutcome};
use crate::model::{Feature, RunId};
use crate::storage::{CheckpointManager, CheckpointStore, DuckDbStore, StorageError};
use crate::web::run_server;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Engine(#[from] EngineError),

    #[error("inference backend error: {0}")]
    Inference(#[from] HttpInferenceError),

    #[error("failed to compile analysis rules: {0}")]
    Rules(#[from] regex::Error),

    #[error("failed to read {path}: {source}")]
    ReadLog {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid web.listen address '{0}'")]
    ListenAddr(String),

    #[error("web server error: {0}")]
    WebServer(#[from] std::io::Error),

    #[error("failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
}

/// Wire the controller from config: checkpoint store, inference backend and
/// documentation search.
pub async fn build_controller(config: Config) -> Result<RunController, RunError> {
    info!(path = %config.checkpoint.path.display(), "Opening checkpoint store");
    let store = DuckDbStore::open(&config.checkpoint.path)?;
    store.init_schema().await?;
    let checkpoints = CheckpointManager::new(Arc::new(store));

    let inference: Arc<dyn Inference> = match config.inference.backend {
        InferenceBackend::Rules => Arc::new(RuleInference::builtin()?),
        InferenceBackend::Http => Arc::new(HttpInference::new(&config.inference)?),
    };
    let search: Arc<dyn DocSearch> = match config.search.backend {
        SearchBackend::Builtin => Arc::new(StaticDocIndex::default()),
        SearchBackend::None => Arc::new(NoSearch),
    };

    let strategies = StrategyTable::new(inference, search);
    Ok(RunController::new(Arc::new(config), strategies, checkpoints)?)
}

pub async fn analyze(
    config: Config,
    file: &Path,
    run_id: Option<String>,
    features: Vec<Feature>,
    question: Option<String>,
) -> Result<(), RunError> {
    let log = tokio::fs::read_to_string(file)
        .await
        .map_err(|source| RunError::ReadLog {
            path: file.display().to_string(),
            source,
        })?;

    let controller = build_controller(config).await?;
    let run_id = run_id.map(RunId::new).unwrap_or_else(RunId::generate);
    info!(run_id = %run_id, file = %file.display(), bytes = log.len(), "Analyzing log file");

    let options = RunOptions {
        features: features.into_iter().collect::<BTreeSet<_>>(),
        question,
    };
    let outcome = controller.start(run_id, Arc::from(log), options).await?;
    report(&outcome)
}

pub async fn resume(config: Config, run_id: String) -> Result<(), RunError> {
    let controller = build_controller(config).await?;
    let outcome = controller.resume(&RunId::new(run_id)).await?;
    report(&outcome)
}

pub async fn status(config: Config, run_id: Option<String>) -> Result<(), RunError> {
    let controller = build_controller(config).await?;

    match run_id {
        Some(id) => {
            let run_id = RunId::new(id);
            let status = controller
                .status(&run_id)
                .await?
                .ok_or(EngineError::NotFound(run_id))?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        None => {
            let runs = controller.list_runs().await?;
            if runs.is_empty() {
                println!("No checkpointed runs");
            }
            for run in runs {
                println!(
                    "{}  v{}  {}",
                    run.run_id,
                    run.latest_version,
                    run.saved_at.to_rfc3339()
                );
            }
        }
    }
    Ok(())
}

pub async fn serve(config: Config) -> Result<(), RunError> {
    let listen: SocketAddr = config
        .web
        .listen
        .parse()
        .map_err(|_| RunError::ListenAddr(config.web.listen.clone()))?;
    let controller = Arc::new(build_controller(config).await?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
        let _ = shutdown_tx.send(true);
    });

    run_server(controller, listen, shutdown_rx).await?;
    info!("Shutdown complete");
    Ok(())
}

/// Print the outcome as JSON; a failed run exits non-zero.
fn report(outcome: &RunOutcome) -> Result<(), RunError> {
    println!("{}", serde_json::to_string_pretty(outcome)?);
    if !outcome.is_completed() {
        std::process::exit(2);
    }
    Ok(())
}
