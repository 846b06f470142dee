//! Logging setup
//!
//! Logs go to stderr so the wrapped command owns stdout. When a log directory
//! is configured, the same events are also written to a daily-rotated
//! `latchkey.log` through a non-blocking writer.

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::settings::LogSettings;

pub const LOG_FILE_NAME: &str = "latchkey.log";

/// Keeps the file writer alive; buffered lines are flushed on drop
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// `RUST_LOG` takes precedence over the configured level
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new(crate::settings::DEFAULT_LOG_LEVEL))
}

pub fn init_logging(settings: &LogSettings) -> Result<LoggingGuard> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact()
        .with_filter(env_filter(&settings.level));
    layers.push(Box::new(console_layer));

    let mut file_guard = None;
    if let Some(dir) = &settings.dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

        let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_NAME);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        file_guard = Some(guard);

        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_thread_names(true)
            .with_ansi(false)
            .with_filter(env_filter(&settings.level));
        layers.push(Box::new(file_layer));
    }

    Registry::default()
        .with(layers)
        .try_init()
        .context("Failed to initialize logging")?;

    if let Some(dir) = &settings.dir {
        tracing::debug!(log_dir = %dir.display(), "File logging initialized");
    }

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_falls_back_on_bad_directive() {
        // Must not panic on an unparsable level
        let _ = env_filter("not a [valid filter");
        let _ = env_filter("latchkey_lock=debug,warn");
    }
}
