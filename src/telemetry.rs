//! Diagnostic log stream.
//!
//! Warnings go to stderr. When a log file is configured every stage
//! transition and captured fault is appended to it as well; without one
//! the file layer is simply absent.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Env var overriding the log file filter
pub const LOG_ENV: &str = "LEGACY2GIT_LOG";

/// Keeps the non-blocking file writer alive; drop it to flush.
pub struct TelemetryGuard {
    _guard: Option<WorkerGuard>,
}

fn stderr_level(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

pub fn init(log_file: Option<&Path>, verbosity: u8) -> Result<TelemetryGuard> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(stderr_level(verbosity));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = match path.parent() {
                Some(dir) if !dir.as_os_str().is_empty() => dir,
                _ => Path::new("."),
            };
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let name = path
                .file_name()
                .with_context(|| format!("Log path {} has no file name", path.display()))?;

            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let filter = EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var(LOG_ENV)
                .from_env_lossy();
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_names(true)
                .with_filter(filter);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install log subscriber")?;

    Ok(TelemetryGuard { _guard: guard })
}
