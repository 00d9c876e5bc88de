//! Tracing initialization.

use std::path::Path;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;

/// Initialize tracing from the logging configuration.
///
/// Logs go to stderr; when a log file is configured it is written in
/// parallel and rotated daily. `RUST_LOG` takes precedence over the
/// configured level.
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let stderr_layer = fmt::layer().with_writer(std::io::stderr);

    match &config.file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
            if let Some(dir) = dir {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create log directory {:?}", dir))?;
            }

            let file_appender = tracing_appender::rolling::daily(
                dir.unwrap_or_else(|| Path::new(".")),
                path.file_name()
                    .unwrap_or_else(|| std::ffi::OsStr::new("mqtt-bridge-heliotherm.log")),
            );

            let file_layer = fmt::layer().with_writer(file_appender).with_ansi(false);

            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))?;
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))?;
        }
    }

    Ok(())
}
