//! Structured logging setup
//!
//! The crate emits `tracing` events everywhere; nothing is printed unless the
//! application installs a subscriber. [`init_logging`] installs a stderr
//! `tracing-subscriber` once per process, in pretty or JSON form.
//!
//! Field names used by events in this crate:
//! - `channel`: channel being ingested or fetched
//! - `start_ms`: start time of the block or query involved
//! - `rate`, `expected`: sample rates
//! - `offset`, `copied`, `nsamp`: placement of a block in a span
//! - `attempt`: fetch iteration of a ring

use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Set once a global subscriber has been installed
static LOGGING_INITIALIZED: OnceCell<LogFormat> = OnceCell::new();

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-friendly output
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level filter (trace, debug, info, warn, error); `RUST_LOG` overrides it
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Errors from logging initialization
#[derive(Debug, Error)]
pub enum LogError {
    /// Another subscriber was installed outside this module
    #[error("failed to set global subscriber: {0}")]
    SetSubscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Install the global subscriber
///
/// Safe to call more than once: later calls are no-ops that report the
/// format chosen by the first call.
///
/// # Arguments
///
/// * `config` - Level and format to use
pub fn init_logging(config: &LogConfig) -> Result<LogFormat, LogError> {
    LOGGING_INITIALIZED
        .get_or_try_init(|| {
            let filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.level));

            match config.format {
                LogFormat::Pretty => tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
                    .try_init()?,
                LogFormat::Json => tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().json().with_writer(std::io::stderr))
                    .try_init()?,
            }

            Ok(config.format)
        })
        .copied()
}

/// Whether [`init_logging`] has installed a subscriber
pub fn is_initialized() -> bool {
    LOGGING_INITIALIZED.get().is_some()
}
