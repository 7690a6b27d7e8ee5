//! Structured logging.
//!
//! # Responsibilities
//! - Install the global tracing subscriber once
//! - Provide the span that scopes a component's log lines
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level when set
//! - JSON for machine ingestion, compact for terminals

use std::fmt;
use std::str::FromStr;

use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::Span;
use tracing_subscriber::{fmt as tfmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOGGING_GUARD: OnceCell<()> = OnceCell::new();

/// Output format of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable single line output.
    #[default]
    Compact,
    /// Structured JSON suitable for log pipelines.
    Json,
}

impl FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "compact" | "text" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(LoggingError::Format(other.to_string())),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Compact => "compact",
            Self::Json => "json",
        })
    }
}

/// Logging settings.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset (e.g. "info", "service_host=debug").
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

/// Errors encountered while configuring logging.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The filter directive does not parse.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Unknown format name.
    #[error("unknown log format '{0}', expected 'compact' or 'json'")]
    Format(String),
    /// Another subscriber is already installed.
    #[error("failed to install log subscriber: {0}")]
    Install(String),
}

/// Install the global subscriber. Repeated calls are no-ops.
pub fn init(config: &LoggingConfig) -> Result<(), LoggingError> {
    LOGGING_GUARD.get_or_try_init(|| install(config)).map(|_| ())
}

fn install(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| LoggingError::Filter(e.to_string()))?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Json => registry
            .with(tfmt::layer().json().with_current_span(true))
            .try_init(),
        LogFormat::Compact => registry.with(tfmt::layer().compact()).try_init(),
    };
    installed.map_err(|e| LoggingError::Install(e.to_string()))
}

/// Span wrapping every lifecycle call made on a component.
///
/// Log lines emitted inside carry the component's name and prefix.
pub fn component_span(name: &str, prefix: &str) -> Span {
    tracing::info_span!("component", component = %name, prefix = %prefix)
}
