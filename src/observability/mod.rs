//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, component spans)
//!     → metrics.rs (counters, histograms)
//!
//! Host start:
//!     → telemetry.rs (TelemetryProvider::setup → TelemetryShutdown)
//! Host shutdown:
//!     → TelemetryShutdown invoked, error joined into the shutdown report
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Every component call runs inside a span tagged with name and prefix
//! - Metrics are cheap and silent until an exporter is installed

pub mod logging;
pub mod metrics;
pub mod telemetry;

pub use logging::{component_span, LogFormat, LoggingConfig, LoggingError};
pub use metrics::PrometheusTelemetry;
pub use telemetry::{TelemetryError, TelemetryProvider, TelemetryShutdown};
