//! Logging setup
//!
//! This module handles:
//! - The level filter (`RUST_LOG` first, then the configured level)
//! - Optional stdout output
//! - Optional append-only log file
//! - Human-readable or JSON formatting

use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::ServerError;

type BoxedLayer = Box<dyn Layer<Layered<EnvFilter, Registry>> + Send + Sync>;

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ServerError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => build_filter(&config.level)?,
    };

    let mut layers: Vec<BoxedLayer> = Vec::new();
    if config.stdout {
        layers.push(match config.format {
            LogFormat::Json => fmt::layer().json().with_writer(std::io::stdout).boxed(),
            LogFormat::Pretty => fmt::layer().with_writer(std::io::stdout).boxed(),
        });
    }
    if !config.path.is_empty() {
        let writer = Mutex::new(open_log_file(&config.path)?);
        layers.push(match config.format {
            LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
            LogFormat::Pretty => fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .boxed(),
        });
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(layers)
        .try_init()
        .map_err(|e| ServerError::Logging(e.to_string()))
}

/// Level filter for a configured level string such as `info` or
/// `debug,realtime_translate::flv=trace`
pub fn build_filter(level: &str) -> Result<EnvFilter, ServerError> {
    EnvFilter::try_new(level)
        .map_err(|e| ServerError::Logging(format!("invalid log level {:?}: {}", level, e)))
}

/// Open the log file for appending, creating parent directories
fn open_log_file(path: &str) -> Result<File, ServerError> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}
