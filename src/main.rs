use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use loglens::config::{load_or_default, resolve_config_path};
use loglens::model::Feature;

#[derive(Parser)]
#[command(name = "loglens")]
#[command(about = "Checkpointed, category-aware log analysis", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a log file and print the result document
    Analyze {
        file: PathBuf,
        /// Reuse an id to resume a checkpointed run of the same log
        #[arg(long)]
        run_id: Option<String>,
        /// streaming, memory or interactive (repeatable)
        #[arg(long = "feature")]
        features: Vec<Feature>,
        /// Question for the interactive feature
        #[arg(long)]
        question: Option<String>,
    },
    /// Continue a checkpointed run
    Resume { run_id: String },
    /// Show one run's status, or list checkpointed runs
    Status { run_id: Option<String> },
    /// Serve the HTTP API
    Serve,
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Init {
        #[arg(long)]
        stdout: bool,
    },
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "loglens=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let load_config = || load_or_default(cli.config.as_deref());

    match cli.command {
        Commands::Analyze {
            file,
            run_id,
            features,
            question,
        } => loglens::cli::run::analyze(load_config()?, &file, run_id, features, question).await?,
        Commands::Resume { run_id } => loglens::cli::run::resume(load_config()?, run_id).await?,
        Commands::Status { run_id } => loglens::cli::run::status(load_config()?, run_id).await?,
        Commands::Serve => loglens::cli::run::serve(load_config()?).await?,
        Commands::Config { action } => match action {
            ConfigAction::Init { stdout } => loglens::cli::config::init(stdout)?,
            ConfigAction::Validate => {
                loglens::cli::config::validate(resolve_config_path(cli.config.as_deref()))?
            }
        },
    }

    Ok(())
}
