//! sightline-agent
//!
//! Usage:
//!   sightline-agent run --config session.json
//!   sightline-agent run --from-env --report-dir ./reports
//!   sightline-agent run --config session.json --navigation-only
//!   sightline-agent sample-config session.json

mod cli;
mod logging;
mod remote;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::{Cli, Commands, RunArgs};
use remote::RemoteAgentConnection;
use sightline::{Automation, AutomationConfig, Connection, ConnectionKind};
use sightline_vision::{HttpDetector, HttpTextRecognizer};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::SampleConfig(args) => {
            write_sample_config(&args.path)?;
            println!("Sample configuration written to {}", args.path.display());
            Ok(())
        }
    }
}

fn write_sample_config(path: &Path) -> Result<()> {
    let json = AutomationConfig::sample().to_json_pretty()?;
    std::fs::write(path, json).with_context(|| format!("cannot write {}", path.display()))
}

fn load_config(args: &RunArgs) -> Result<AutomationConfig> {
    let mut config = match &args.config {
        Some(path) => AutomationConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => AutomationConfig::from_env().context("loading configuration from environment")?,
    };
    if let Some(dir) = &args.report_dir {
        config.logging.report_dir = Some(dir.clone());
    }
    if config.connection.api_key.is_none() {
        config.connection.api_key = std::env::var("REMOTE_API_KEY").ok();
    }
    Ok(config)
}

fn build_connection(config: &AutomationConfig) -> Result<Box<dyn Connection>> {
    match config.connection.kind {
        ConnectionKind::Remote => Ok(Box::new(RemoteAgentConnection::new(&config.connection)?)),
        other => bail!(
            "no built-in backend for {:?} connections; point a remote UI agent at the desktop and use kind \"remote\"",
            other
        ),
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let config = load_config(&args)?;
    let _guard = logging::init_logging(
        args.log_level.as_deref(),
        &config.logging.level,
        config.logging.log_dir.as_deref(),
    )?;

    info!(
        target = %config.connection.address(),
        app = %config.target.app_name,
        "Starting sightline-agent"
    );

    let connection = build_connection(&config)?;
    let detector = Arc::new(HttpDetector::from_env()?);
    let recognizer = Arc::new(HttpTextRecognizer::from_env()?);
    let automation = Automation::new(config, connection, detector, recognizer)?;

    let work = async {
        if args.navigation_only {
            automation.run_navigation_only().await
        } else {
            automation.run().await
        }
    };

    let result = tokio::select! {
        r = work => Some(r),
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, tearing down session");
            None
        }
    };

    automation.shutdown().await;
    match automation.save_report() {
        Ok(path) => info!("Report: {}", path.display()),
        Err(e) => error!("Failed to save session report: {}", e),
    }

    match result {
        Some(Ok(outcome)) => {
            info!(session = %outcome.session_id, app = %outcome.app_name, "Session finished");
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        Some(Err(e)) if e.safety_critical() => {
            bail!("CRITICAL SAFETY FAILURE, no actions were taken in the application: {e}")
        }
        Some(Err(e)) => Err(e.into()),
        None => bail!("session interrupted"),
    }
}
