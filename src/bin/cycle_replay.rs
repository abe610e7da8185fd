//! Cycle file replay
//!
//! Streams the cycles of one cycle file to a running data service the way
//! the line-side relay does: each cycle is cut into window-sized batches,
//! the first batch of a cycle carries `reset = true`.
//!
//! Usage:
//!   cycle-replay --file data/line-a/cycles.csv --window-size 100
//!   cycle-replay --file cycles.csv --window-size 100 --model-folder line-a --delay-ms 50

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use boltwatch::ml_engine::dataset::read_cycles;
use boltwatch::types::{ensemble_tag, ConfigureModelRequest, SubmitSamplesRequest};

#[derive(Parser, Debug)]
#[command(name = "cycle-replay")]
#[command(about = "Replay a cycle file against a running data service")]
struct Args {
    /// Cycle file, CSV or workbook (pairs of angle/torque records)
    #[arg(long)]
    file: PathBuf,

    /// Data service base URL
    #[arg(long, default_value = "http://127.0.0.1:8001")]
    url: String,

    /// Samples per batch
    #[arg(long, default_value_t = 100)]
    window_size: usize,

    /// Configure this model folder before replaying
    #[arg(long)]
    model_folder: Option<String>,

    /// Model name inside the folder (default `ensemble_<window_size>`)
    #[arg(long)]
    model_name: Option<String>,

    /// Pause between batches
    #[arg(long, default_value_t = 100)]
    delay_ms: u64,
}

#[derive(Debug, Default)]
struct ReplayStats {
    cycles: usize,
    batches_sent: usize,
    send_errors: usize,
}

struct Relay {
    http: reqwest::Client,
    base_url: String,
}

impl Relay {
    fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn check_health(&self) -> Result<()> {
        let resp = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .with_context(|| format!("Data service at {} is unreachable", self.base_url))?;
        if !resp.status().is_success() {
            bail!("Data service health check returned {}", resp.status());
        }
        Ok(())
    }

    async fn configure(&self, request: &ConfigureModelRequest) -> Result<()> {
        let resp = self
            .http
            .post(format!("{}/update_model", self.base_url))
            .json(request)
            .send()
            .await
            .context("Failed to send model configuration")?;
        if !resp.status().is_success() {
            bail!("Model configuration rejected with {}", resp.status());
        }
        Ok(())
    }

    async fn submit(&self, batch: &SubmitSamplesRequest) -> Result<()> {
        let resp = self
            .http
            .post(format!("{}/data", self.base_url))
            .json(batch)
            .send()
            .await?;
        if !resp.status().is_success() {
            bail!("batch rejected with {}", resp.status());
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    if args.window_size == 0 {
        bail!("--window-size must be > 0");
    }

    let cycles = read_cycles(&args.file).with_context(|| format!("Failed to read {}", args.file.display()))?;
    info!(file = %args.file.display(), cycles = cycles.len(), "Loaded cycle file");

    let relay = Relay::new(&args.url)?;
    relay.check_health().await?;

    if let Some(folder) = &args.model_folder {
        let request = ConfigureModelRequest {
            model_folder: folder.clone(),
            model_name: args.model_name.clone().unwrap_or_else(|| ensemble_tag(args.window_size)),
            window_size: args.window_size,
        };
        relay.configure(&request).await?;
        info!(folder = %request.model_folder, model = %request.model_name, "Model configured");
    }

    let delay = Duration::from_millis(args.delay_ms);
    let mut stats = ReplayStats::default();
    for cycle in &cycles {
        let samples = cycle.angle.len().min(cycle.torque.len());
        if samples == 0 {
            continue;
        }
        stats.cycles += 1;
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();

        for (i, start) in (0..samples).step_by(args.window_size).enumerate() {
            let end = (start + args.window_size).min(samples);
            let batch = SubmitSamplesRequest {
                angle: cycle.angle[start..end].to_vec(),
                torque: cycle.torque[start..end].to_vec(),
                reset: i == 0,
                identifier: cycle.identifier.clone(),
                timestamp: timestamp.clone(),
            };
            match relay.submit(&batch).await {
                Ok(()) => stats.batches_sent += 1,
                Err(e) => {
                    stats.send_errors += 1;
                    warn!(identifier = %cycle.identifier, batch = i, error = %e, "Failed to send batch");
                }
            }
            tokio::time::sleep(delay).await;
        }
        info!(identifier = %cycle.identifier, samples, "Cycle replayed");
    }

    info!(
        cycles = stats.cycles,
        batches = stats.batches_sent,
        errors = stats.send_errors,
        "Replay finished"
    );
    Ok(())
}
