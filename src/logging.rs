//! Diagnostic logging setup for the binary

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "ftms-bridge.log";

/// Keeps the non-blocking file writer alive; logs are flushed when dropped
pub struct LoggingGuard {
    _guards: Vec<WorkerGuard>,
}

/// `RUST_LOG` wins over the configured level
fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber: console output plus an optional
/// daily-rolling file under `log_dir`
///
/// # Errors
///
/// Returns error if the log directory cannot be created or a global
/// subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<LoggingGuard> {
    let mut guards = Vec::new();

    let console_layer = fmt::layer().with_writer(std::io::stdout).with_target(false);

    let file_layer = if config.file_enabled {
        std::fs::create_dir_all(&config.log_dir)
            .with_context(|| format!("creating log directory {}", config.log_dir))?;

        let file_appender = tracing_appender::rolling::daily(&config.log_dir, LOG_FILE_PREFIX);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        guards.push(guard);
        Some(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(build_filter(&config.level))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("installing tracing subscriber")?;

    tracing::debug!("Logging initialized (level: {})", config.level);

    Ok(LoggingGuard { _guards: guards })
}
