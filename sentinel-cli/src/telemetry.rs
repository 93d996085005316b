use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global tracing subscriber: a human-readable stdout layer,
/// plus a JSON file layer when `log_path` is set.
pub fn init_tracing(filter: &str, log_path: Option<&Path>) -> Result<()> {
    let stdout_layer = fmt::layer()
        .with_target(false)
        .with_filter(EnvFilter::new(filter));
    let registry = tracing_subscriber::registry().with(stdout_layer);

    let Some(path) = log_path else {
        registry.try_init()?;
        return Ok(());
    };

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create log directory {dir:?}"))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(file);
    // The guard must outlive main or buffered lines are lost on exit.
    let _ = FILE_GUARD.set(guard);

    let file_layer = fmt::layer()
        .json()
        .with_ansi(false)
        .with_target(true)
        .with_writer(writer)
        .with_filter(EnvFilter::new(filter));
    registry.with(file_layer).try_init()?;
    Ok(())
}
