use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "sightline-agent.log";

/// An explicit `--log-level` wins, then `RUST_LOG`, then the configured level.
fn build_filter(cli_level: Option<&str>, config_level: &str) -> Result<EnvFilter> {
    match cli_level {
        Some(level) => EnvFilter::try_new(level).with_context(|| format!("invalid log filter '{level}'")),
        None => EnvFilter::try_from_default_env().or_else(|_| {
            EnvFilter::try_new(config_level)
                .with_context(|| format!("invalid log level '{config_level}'"))
        }),
    }
}

/// Console logging, plus a daily-rolling file under `log_dir` when given.
/// The returned guard flushes the file writer and must live until exit.
pub fn init_logging(
    cli_level: Option<&str>,
    config_level: &str,
    log_dir: Option<&Path>,
) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(cli_level, config_level)?;

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("cannot create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .try_init()
        .context("logging already initialised")?;

    Ok(guard)
}
