//! Structured logging setup: an `EnvFilter`-driven `tracing-subscriber`
//! registry writing to a rolling daily file under `.geoffrussy/logs/`, with
//! verbose mode additionally echoing to stderr.

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Holds the non-blocking writer's worker thread alive; drop it only at
/// process exit or logging stops flushing.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

pub fn init(log_dir: &Path, verbose: bool) -> Result<LoggingGuard> {
    std::fs::create_dir_all(log_dir).context("failed to create log directory")?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "geoffrussy.log");
    let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_layer = tracing_subscriber::fmt::layer().json().with_writer(non_blocking);

    let registry = tracing_subscriber::registry().with(env_filter).with(file_layer);

    if verbose {
        registry.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)).try_init()
    } else {
        registry.try_init()
    }
    .context("failed to install tracing subscriber")?;

    Ok(LoggingGuard { _file_guard: file_guard })
}
