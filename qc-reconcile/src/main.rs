//! qc-reconcile: drives declared instance specs through the reconciliation
//! core against the in-process simulated control plane.
//!
//! Useful for checking what remote calls a spec change would issue, and in
//! which order, before pointing a real client at it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use qc_reconcile::clients::Call;
use qc_reconcile::{
    Context, DeclaredResourceSpec, InstanceOrchestrator, ObservedInstanceState, ReconcileConfig,
    SimulatedCloud,
};

/// QingCloud instance reconciler
#[derive(Parser, Debug)]
#[command(name = "qc-reconcile", version, about)]
struct Args {
    /// JSON file with retry and polling settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the maximum attempts for transient errors
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Override the lifecycle poll interval in milliseconds
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Override the lifecycle poll timeout in seconds
    #[arg(long)]
    poll_timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an instance from a spec, optionally update and delete it
    Simulate {
        /// Declared spec (JSON) to create
        #[arg(long)]
        spec: PathBuf,

        /// Second spec (JSON) to update the instance to
        #[arg(long)]
        update: Option<PathBuf>,

        /// Delete the instance at the end
        #[arg(long)]
        delete: bool,

        /// Describe calls each simulated transition takes to settle
        #[arg(long, default_value = "2")]
        transition_describes: u32,
    },
}

#[derive(Serialize)]
struct SimulationReport {
    created: ObservedInstanceState,
    updated: Option<ObservedInstanceState>,
    deleted: bool,
    calls: Vec<Call>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "qc_reconcile=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    match args.command {
        Commands::Simulate {
            spec,
            update,
            delete,
            transition_describes,
        } => {
            let cloud = Arc::new(SimulatedCloud::with_transition_describes(transition_describes));
            let orchestrator = InstanceOrchestrator::new(Context::new(cloud.clone(), &config));

            let declared = read_spec(&spec)?;
            let created = orchestrator
                .create(&declared)
                .await
                .context("Create failed")?;
            info!("Created instance {}", created.id);

            let updated = match update {
                Some(path) => {
                    let declared = read_spec(&path)?;
                    let report = orchestrator
                        .update(&created.id, &declared)
                        .await
                        .context("Update failed")?;
                    Some(report.observed)
                }
                None => None,
            };

            if delete {
                orchestrator
                    .delete(&created.id)
                    .await
                    .context("Delete failed")?;
            }

            let report = SimulationReport {
                created,
                updated,
                deleted: delete,
                calls: cloud.calls().await,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn load_config(args: &Args) -> Result<ReconcileConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            ReconcileConfig::from_json(&json)
                .with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => ReconcileConfig::default(),
    };

    if let Some(max_attempts) = args.max_attempts {
        config.retry.max_attempts = max_attempts;
    }
    if let Some(interval) = args.poll_interval_ms {
        config.lifecycle_poll.interval_ms = interval;
        config.network_poll.interval_ms = interval;
    }
    if let Some(timeout) = args.poll_timeout_secs {
        config.lifecycle_poll.timeout_ms = timeout.saturating_mul(1_000);
    }
    Ok(config)
}

fn read_spec(path: &Path) -> Result<DeclaredResourceSpec> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read spec {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("Invalid spec {}", path.display()))
}
