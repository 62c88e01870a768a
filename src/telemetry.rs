//! Logging setup.
//!
//! `RUST_LOG` wins when set. Otherwise stderr only shows warnings (or
//! `debug` with `--verbose`) so engine records stay out of the styled
//! console output, while the daily rolling file under `.waypoint/logs/`
//! keeps `info`. Stderr output is pretty or JSON.

use std::path::Path;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Debug, Clone, Default)]
pub struct LogOptions<'a> {
    pub verbose: bool,
    pub json: bool,
    /// Directory for the rolling log file; `None` disables file output.
    pub log_dir: Option<&'a Path>,
}

const FILE_DEFAULT: &str = "info";

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

fn stderr_default(verbose: bool) -> &'static str {
    if verbose { "waypoint=debug,info" } else { "warn" }
}

/// Install the global subscriber. Keep the returned guard alive for the
/// lifetime of the process so buffered file output is flushed.
pub fn init_logging(options: LogOptions<'_>) -> Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match options.log_dir {
        Some(dir) if dir.is_dir() => {
            let appender = tracing_appender::rolling::daily(dir, "waypoint.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(env_filter(FILE_DEFAULT));
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    let stderr_filter = env_filter(stderr_default(options.verbose));
    let (pretty, json) = if options.json {
        (
            None,
            Some(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_filter(stderr_filter),
            ),
        )
    } else {
        (
            Some(
                fmt::layer()
                    .with_target(false)
                    .without_time()
                    .with_writer(std::io::stderr)
                    .with_filter(stderr_filter),
            ),
            None,
        )
    };

    tracing_subscriber::registry()
        .with(pretty)
        .with(json)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(guard)
}
