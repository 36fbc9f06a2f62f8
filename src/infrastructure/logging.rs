use crate::infrastructure::error::InfraError;
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

const LOG_FILTER_ENV: &str = "TUTOR_SCHEDULE_LOG";
const DEFAULT_FILTER: &str = "info";
const COMMAND_LOG_FILE: &str = "commands.log";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs the global subscriber: JSON lines into `logs_dir/commands.log`.
/// Keep the returned guard alive for as long as events should be flushed.
pub fn init_logging(logs_dir: &Path) -> Result<WorkerGuard, InfraError> {
    fs::create_dir_all(logs_dir)?;
    let file_appender = tracing_appender::rolling::never(logs_dir, COMMAND_LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_current_span(false),
        )
        .try_init()
        .map_err(|error| InfraError::InvalidConfig(format!("logging already initialised: {error}")))?;

    tracing::info!(logs_dir = %logs_dir.display(), "command logging initialised");
    Ok(guard)
}
