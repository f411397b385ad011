//! Logging configuration
//!
//! Structured logging with tracing, to stdout or to a daily log file.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Name prefix of the daily log files.
pub const LOG_FILE_PREFIX: &str = "waypoint.log";

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize logging with environment-based filtering.
///
/// With a `log_directory` the output goes to a daily-rotated file there, and
/// the returned guard must live as long as the process so buffered lines are
/// flushed on exit.
pub fn init(log_directory: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let Some(dir) = log_directory else {
        tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_target(true)
            .try_init()
            .map_err(|e| anyhow::anyhow!(e))
            .context("installing stdout logger")?;
        return Ok(None);
    };

    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating log directory {}", dir.display()))?;
    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_target(true)
        .with_ansi(false)
        .with_writer(writer)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
        .with_context(|| format!("installing file logger in {}", dir.display()))?;
    Ok(Some(guard))
}
