//! Fleet controller — one status check across every configured node.
//!
//! Exit status is 0 whenever the run completes, even with nodes offline or
//! erroring. Non-zero means a bad config, a poll task abort, or an audit
//! store that could not be opened. Logs go to stderr; stdout carries only
//! the batch (table or `--json`).

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

use fleet_controller::{render_table, FleetConfig, RunOrchestrator};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Fleet config file (YAML). Defaults to $FLEET_CONFIG, then ~/.fleet-controller/fleet.yaml
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print the batch as JSON instead of a table
    #[arg(long)]
    json: bool,
    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "fleet_controller=info".into());
    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    info!("Fleet controller v{}", env!("CARGO_PKG_VERSION"));

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Fatal error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config_path = FleetConfig::locate(args.config)?;
    let mut config = FleetConfig::load(&config_path)
        .with_context(|| format!("Failed to load fleet config {}", config_path.display()))?;
    config.apply_env_overrides(|key| std::env::var(key).ok());

    let audit_path = config.audit_db_path()?;
    if let Some(dir) = audit_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create audit directory {}", dir.display()))?;
    }

    let mut orchestrator =
        RunOrchestrator::from_config(&config).context("Failed to build run orchestrator")?;
    let report = orchestrator.run().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report.summaries)?);
    } else {
        print!("{}", render_table(&report.summaries));
    }

    info!(
        run_id = %report.run_id,
        nodes = report.summaries.len(),
        "Summary logged"
    );
    Ok(())
}
