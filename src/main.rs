//! BOLTWATCH - bolt-tightening quality monitor
//!
//! # Usage
//!
//! ```bash
//! # Train every model folder under data/ for the configured window sizes
//! boltwatch train --data-dir data --models-dir models
//!
//! # Run the prediction and data services
//! boltwatch serve
//!
//! # List trained models
//! boltwatch models
//! ```
//!
//! # Environment Variables
//!
//! - `BOLTWATCH_CONFIG`: path to the TOML config (default `./boltwatch.toml`)
//! - `BOLTWATCH_LOG_JSON`: set to "true" for JSON log lines
//! - `RUST_LOG`: logging level (default: info)

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use clap::{Parser, Subcommand};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use boltwatch::api::{data_app, prediction_app, DataState, PredictionState};
use boltwatch::config::defaults::METRICS_FILE_NAME;
use boltwatch::config::ServiceConfig;
use boltwatch::ml_engine::TrainingPipeline;
use boltwatch::pipeline::{CycleAccumulator, LocalPredictor, Predictor, RemotePredictor};
use boltwatch::storage::{DefectArchive, FileArtifactStore, ModelRegistry, TrainingReportStore};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "boltwatch")]
#[command(about = "Bolt-tightening quality monitor")]
#[command(version)]
struct CliArgs {
    /// TOML config file (overrides the default search order)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: SubCommand,
}

#[derive(Subcommand, Debug)]
enum SubCommand {
    /// Run the prediction and data services
    Serve {
        /// Prediction service bind address (overrides `server.prediction_addr`)
        #[arg(long)]
        prediction_addr: Option<String>,
        /// Data service bind address (overrides `server.data_addr`)
        #[arg(long)]
        data_addr: Option<String>,
    },
    /// Train one ensemble per model folder and window size
    Train {
        #[arg(long)]
        data_dir: Option<PathBuf>,
        #[arg(long)]
        models_dir: Option<PathBuf>,
        /// Repeatable; replaces `training.window_sizes`
        #[arg(long = "window-size")]
        window_sizes: Vec<usize>,
    },
    /// Print the model catalogue as JSON
    Models,
}

#[derive(Debug, Clone, Copy)]
enum TaskName {
    PredictionServer,
    DataServer,
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PredictionServer => write!(f, "PredictionServer"),
            Self::DataServer => write!(f, "DataServer"),
        }
    }
}

// ============================================================================
// Setup
// ============================================================================

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let json = std::env::var("BOLTWATCH_LOG_JSON").is_ok_and(|v| v.eq_ignore_ascii_case("true") || v == "1");
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<ServiceConfig> {
    match path {
        Some(p) => ServiceConfig::load_from_file(p).with_context(|| format!("Failed to load config {}", p.display())),
        None => Ok(ServiceConfig::load()),
    }
}

fn open_registry(config: &ServiceConfig) -> Arc<ModelRegistry> {
    let store = FileArtifactStore::new(&config.models.dir);
    Arc::new(ModelRegistry::new(Arc::new(store)).with_threshold(config.ensemble.threshold))
}

/// Report history is optional; a database that cannot be opened is logged.
fn open_reports(config: &ServiceConfig) -> Option<TrainingReportStore> {
    match TrainingReportStore::open(&config.models.reports_db) {
        Ok(store) => Some(store),
        Err(e) => {
            warn!(path = %config.models.reports_db.display(), error = %e, "Training report history unavailable");
            None
        }
    }
}

// ============================================================================
// serve
// ============================================================================

/// Spawn one HTTP server task into the JoinSet.
fn spawn_http_server(
    task_set: &mut JoinSet<Result<TaskName>>,
    name: TaskName,
    listener: tokio::net::TcpListener,
    app: Router,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!(task = %name, "Task starting");

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!(task = %name, "Received shutdown signal");
            })
            .await;

        match result {
            Ok(()) => {
                info!(task = %name, "Graceful shutdown complete");
                Ok(name)
            }
            Err(e) => {
                error!(task = %name, error = %e, "Server error");
                Err(anyhow::anyhow!("{name} error: {e}"))
            }
        }
    });
}

/// Monitor tasks; cancel everything when one fails.
async fn run_supervisor(task_set: &mut JoinSet<Result<TaskName>>, cancel_token: CancellationToken) -> Result<()> {
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Supervisor: shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!(task = %task_name, "Supervisor: task completed");
                    }
                    Some(Ok(Err(e))) => {
                        error!(error = %e, "Supervisor: task failed");
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "Supervisor: task panicked");
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {e}"));
                    }
                    None => break,
                }
            }
        }
    }

    // Let the servers drain
    while let Some(result) = task_set.join_next().await {
        if let Ok(Err(e)) = result {
            warn!(error = %e, "Task ended with error during shutdown");
        }
    }
    Ok(())
}

async fn serve(config: ServiceConfig) -> Result<()> {
    let registry = open_registry(&config);

    let mut prediction_state = PredictionState::new(Arc::clone(&registry));
    if let Some(reports) = open_reports(&config) {
        prediction_state = prediction_state.with_reports(reports);
    }

    let predictor: Arc<dyn Predictor> = match &config.accumulator.prediction_url {
        Some(url) => {
            info!(url = %url, "Data service uses the remote prediction service");
            Arc::new(RemotePredictor::new(url).context("Failed to build prediction client")?)
        }
        None => Arc::new(LocalPredictor::new(Arc::clone(&registry))),
    };
    let mut accumulator = CycleAccumulator::new(predictor, config.accumulator.stale_timeout());
    if config.accumulator.archive_enabled {
        info!(dir = %config.accumulator.archive_dir.display(), "Defect archive enabled");
        accumulator = accumulator.with_archive(DefectArchive::new(&config.accumulator.archive_dir));
    }
    let data_state = DataState::new(Arc::new(accumulator));

    let cors = &config.server.cors_origins;
    let prediction_listener = tokio::net::TcpListener::bind(&config.server.prediction_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.server.prediction_addr))?;
    let data_listener = tokio::net::TcpListener::bind(&config.server.data_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.server.data_addr))?;
    info!(addr = %config.server.prediction_addr, "Prediction service listening");
    info!(addr = %config.server.data_addr, "Data service listening");

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown");
        shutdown_token.cancel();
    });

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();
    spawn_http_server(
        &mut task_set,
        TaskName::PredictionServer,
        prediction_listener,
        prediction_app(prediction_state, cors),
        cancel_token.clone(),
    );
    spawn_http_server(
        &mut task_set,
        TaskName::DataServer,
        data_listener,
        data_app(data_state, cors),
        cancel_token.clone(),
    );

    run_supervisor(&mut task_set, cancel_token).await
}

// ============================================================================
// train / models
// ============================================================================

async fn train(config: ServiceConfig) -> Result<()> {
    let registry = open_registry(&config);
    let reports = open_reports(&config);
    let metrics_path = config.models.dir.join(METRICS_FILE_NAME);
    let pipeline = TrainingPipeline::from_config(&config);

    info!(
        data_dir = %config.training.data_dir.display(),
        models_dir = %config.models.dir.display(),
        window_sizes = ?pipeline.window_sizes(),
        "Starting training sweep"
    );
    let summary = tokio::task::spawn_blocking(move || pipeline.run(&registry, reports.as_ref(), &metrics_path))
        .await
        .context("Training task panicked")?
        .context("Training sweep failed")?;

    for failed in &summary.failed {
        warn!(folder = %failed.folder, window_size = failed.window_size, reason = %failed.reason, "Unit skipped");
    }
    info!(trained = summary.metrics.len(), failed = summary.failed.len(), "Training complete");
    Ok(())
}

fn list_models(config: &ServiceConfig) -> Result<()> {
    let catalogue = open_registry(config).catalogue().context("Failed to read model catalogue")?;
    println!("{}", serde_json::to_string_pretty(&catalogue)?);
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = CliArgs::parse();
    let mut config = load_config(args.config.as_ref())?;

    match args.command {
        SubCommand::Serve {
            prediction_addr,
            data_addr,
        } => {
            if let Some(addr) = prediction_addr {
                config.server.prediction_addr = addr;
            }
            if let Some(addr) = data_addr {
                config.server.data_addr = addr;
            }
            config.validate()?;
            serve(config).await
        }
        SubCommand::Train {
            data_dir,
            models_dir,
            window_sizes,
        } => {
            if let Some(dir) = data_dir {
                config.training.data_dir = dir;
            }
            if let Some(dir) = models_dir {
                config.models.dir = dir;
            }
            if !window_sizes.is_empty() {
                config.training.window_sizes = window_sizes;
            }
            config.validate()?;
            train(config).await
        }
        SubCommand::Models => list_models(&config),
    }
}
