//! Tracing subscriber setup.

use anyhow::{Context, Result, anyhow};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::config::{LogFormat, LoggingSection};

const LOG_FILE_PREFIX: &str = "schoolhouse.log";

/// `RUST_LOG` wins; otherwise the configured level, raised to `debug` by
/// `--verbose`.
fn build_filter(level: &str, verbose: bool, rust_log: Option<&str>) -> Result<EnvFilter> {
    let directives = match rust_log.filter(|v| !v.trim().is_empty()) {
        Some(env) => env.to_string(),
        None if verbose => "debug".to_string(),
        None => level.to_string(),
    };
    EnvFilter::try_new(&directives)
        .with_context(|| format!("Invalid log filter '{directives}'"))
}

/// Install the global subscriber. Hold the returned guard for the life of
/// the process when logging to files, or buffered lines are lost on exit.
pub fn init(config: &LoggingSection, verbose: bool) -> Result<Option<WorkerGuard>> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = build_filter(&config.level, verbose, rust_log.as_deref())?;

    let (writer, guard) = match &config.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(writer), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(config.dir.is_none());
    let installed = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    installed.map_err(|e| anyhow!("Failed to install tracing subscriber: {e}"))?;
    Ok(guard)
}
