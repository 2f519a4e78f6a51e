//! Tracing setup for the binary: console plus a daily-rolling log file
//! under the data directory.

use anyhow::Result;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Returns a guard that must stay alive for the process; dropping it stops
/// the background log writer.
pub fn init_logging(data_dir: &Path, debug: bool) -> Result<WorkerGuard> {
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("retrace")
        .filename_suffix("log")
        .max_log_files(5)
        .build(data_dir)?;
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = || {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directives(debug)))
    };

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_filter(env_filter());

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_filter(env_filter());

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .init();

    Ok(guard)
}

/// Baseline filter when `RUST_LOG` is unset: chatty dependencies are
/// always capped below our own level.
fn default_directives(debug: bool) -> String {
    let level = if debug { "debug" } else { "info" };
    format!("{level},rusty_tesseract=error,reqwest=warn")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directives_are_valid_filters() {
        for debug in [false, true] {
            let spec = default_directives(debug);
            assert!(EnvFilter::try_new(&spec).is_ok(), "bad filter: {spec}");
        }
    }
}
