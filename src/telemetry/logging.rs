//! Tracing subscriber setup for sandboxed runs.
//!
//! Logs go to stderr so they interleave with the host engine's own test
//! output rather than competing for stdout.

use std::str::FromStr;

use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logging (default for CI runs).
    #[default]
    Json,
    /// Human-readable pretty printing (for development).
    Pretty,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            _ => Err(()),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Log level filter (e.g., "info", "debug", "testwarden=trace").
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { format: LogFormat::Json, level: "info".to_string() }
    }
}

impl LogConfig {
    /// Build from `TESTWARDEN_LOG` (filter directive) and
    /// `TESTWARDEN_LOG_FORMAT` (`json`/`pretty`). Invalid values fall back
    /// to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let level = std::env::var("TESTWARDEN_LOG").unwrap_or(defaults.level);
        let format = std::env::var("TESTWARDEN_LOG_FORMAT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.format);
        Self { format, level }
    }
}

/// Errors that can occur during logging initialization.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),
    #[error("Subscriber already initialized")]
    AlreadyInitialized,
}

/// Initialize the tracing subscriber with the given configuration.
///
/// This should be called once before the first suite starts.
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    let filter =
        EnvFilter::try_new(&config.level).map_err(|e| LogError::InvalidFilter(e.to_string()))?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.format {
        LogFormat::Json => registry.with(fmt::layer().json().with_writer(std::io::stderr)).try_init(),
        LogFormat::Pretty => {
            registry.with(fmt::layer().pretty().with_writer(std::io::stderr)).try_init()
        }
    };
    result.map_err(|_| LogError::AlreadyInitialized)
}
