//! Metrics collection and exposition.
//!
//! # Metrics
//! - `host_component_runs_total` (counter): finished `run` calls by component, outcome
//! - `host_shutdown_duration_seconds` (histogram): time from fan-out to last ack
//! - `host_shutdown_failures_total` (counter): failures by kind
//! - `listener_connections_accepted_total` (counter): accepted TCP connections
//!
//! # Design Decisions
//! - Metric updates are no-ops until a recorder is installed
//! - The Prometheus exporter is one `TelemetryProvider`; the host stays
//!   backend-agnostic

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::FutureExt;
use metrics_exporter_prometheus::PrometheusBuilder;

use super::telemetry::{TelemetryError, TelemetryProvider, TelemetryShutdown};

/// Serves a Prometheus scrape endpoint for the lifetime of the host.
#[derive(Debug, Clone)]
pub struct PrometheusTelemetry {
    address: SocketAddr,
}

impl PrometheusTelemetry {
    /// Expose metrics on `address`.
    pub fn new(address: SocketAddr) -> Self {
        Self { address }
    }
}

impl TelemetryProvider for PrometheusTelemetry {
    fn name(&self) -> &str {
        "prometheus"
    }

    fn setup(&self) -> Result<TelemetryShutdown, TelemetryError> {
        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.address)
            .build()
            .map_err(|e| TelemetryError::Setup(e.to_string()))?;
        metrics::set_global_recorder(recorder).map_err(|e| TelemetryError::Setup(e.to_string()))?;

        let address = self.address;
        let task = tokio::spawn(async move {
            if let Err(e) = exporter.await {
                tracing::error!(error = ?e, %address, "Metrics exporter stopped");
            }
        });
        tracing::info!(%address, "Metrics endpoint listening");

        Ok(Box::new(move || {
            async move {
                task.abort();
                match task.await {
                    Ok(()) => Ok(()),
                    Err(e) if e.is_cancelled() => Ok(()),
                    Err(e) => Err(TelemetryError::Shutdown(e.to_string())),
                }
            }
            .boxed()
        }))
    }
}

/// Record a finished `run`.
pub fn record_component_run(component: &str, outcome: &'static str) {
    metrics::counter!(
        "host_component_runs_total",
        "component" => component.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a completed shutdown fan-out.
pub fn record_shutdown(elapsed: Duration) {
    metrics::histogram!("host_shutdown_duration_seconds").record(elapsed.as_secs_f64());
}

/// Record one shutdown failure.
pub fn record_shutdown_failure(kind: &'static str) {
    metrics::counter!("host_shutdown_failures_total", "kind" => kind).increment(1);
}

/// Record an accepted listener connection.
pub fn record_connection_accepted(listener: &str) {
    metrics::counter!(
        "listener_connections_accepted_total",
        "listener" => listener.to_string()
    )
    .increment(1);
}
