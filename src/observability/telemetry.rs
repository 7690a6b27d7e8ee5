//! Telemetry exporter contract.
//!
//! # Responsibilities
//! - Let the host install an exporter before components run
//! - Hand back an asynchronous shutdown callback the host calls while stopping
//!
//! # Design Decisions
//! - Exporter backends live behind `TelemetryProvider`; the host never
//!   depends on a concrete one
//! - The shutdown callback is `FnOnce`: flushing twice is impossible

use futures_util::future::BoxFuture;
use thiserror::Error;

/// Flushes and tears down an installed exporter.
pub type TelemetryShutdown = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), TelemetryError>> + Send>;

/// Errors raised by a telemetry exporter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TelemetryError {
    /// The exporter could not be installed.
    #[error("telemetry setup failed: {0}")]
    Setup(String),
    /// The exporter failed to flush or stop.
    #[error("telemetry shutdown failed: {0}")]
    Shutdown(String),
}

/// Something that can install a telemetry pipeline.
pub trait TelemetryProvider: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Install the exporter. Called once, from within the Tokio runtime.
    fn setup(&self) -> Result<TelemetryShutdown, TelemetryError>;
}
