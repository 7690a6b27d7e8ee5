//! Shutdown coordination for the host.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

use crate::component::{ComponentError, StopError};
use crate::observability::TelemetryError;

/// Trigger for graceful shutdown.
///
/// Cheap to clone; any clone can request shutdown and any clone can wait for
/// it. Triggering is sticky: waiters that subscribe late still observe it.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    /// Create a new, untriggered shutdown trigger.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request shutdown.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Whether shutdown has been requested.
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until shutdown is requested.
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// One thing that went wrong while the host was shutting down.
#[derive(Debug, Clone, Error)]
pub enum ShutdownFailure {
    /// A component's `run` failed; this triggered or accompanied the shutdown.
    #[error("component '{component}' failed while running: {error}")]
    Run {
        /// Component name.
        component: String,
        /// The run error.
        #[source]
        error: Arc<ComponentError>,
    },

    /// A component acknowledged its stop with a failure.
    #[error("component '{component}' failed to stop cleanly: {error}")]
    Stop {
        /// Component name.
        component: String,
        /// The stop error.
        #[source]
        error: StopError,
    },

    /// A component did not acknowledge its stop before the deadline.
    #[error("component '{component}' did not stop within {timeout:?}")]
    Stuck {
        /// Component name.
        component: String,
        /// The deadline that passed.
        timeout: Duration,
    },

    /// The telemetry exporter failed to shut down.
    #[error(transparent)]
    Telemetry(TelemetryError),
}

impl ShutdownFailure {
    /// The component this failure belongs to, if any.
    pub fn component(&self) -> Option<&str> {
        match self {
            Self::Run { component, .. }
            | Self::Stop { component, .. }
            | Self::Stuck { component, .. } => Some(component),
            Self::Telemetry(_) => None,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Run { .. } => "run",
            Self::Stop { .. } => "stop",
            Self::Stuck { .. } => "stuck",
            Self::Telemetry(_) => "telemetry",
        }
    }
}

/// Aggregate of every failure collected during shutdown.
///
/// Cloned out of the host, so repeated `shutdown` calls return equal values.
#[derive(Debug, Clone, Error)]
pub struct ShutdownError {
    failures: Vec<ShutdownFailure>,
}

impl ShutdownError {
    pub(crate) fn from_failures(failures: Vec<ShutdownFailure>) -> Option<Self> {
        if failures.is_empty() {
            None
        } else {
            Some(Self { failures })
        }
    }

    /// Every collected failure, run failures first.
    pub fn failures(&self) -> &[ShutdownFailure] {
        &self.failures
    }

    /// Names of components that never acknowledged their stop.
    pub fn stuck_components(&self) -> Vec<&str> {
        self.failures
            .iter()
            .filter(|f| matches!(f, ShutdownFailure::Stuck { .. }))
            .filter_map(ShutdownFailure::component)
            .collect()
    }
}

impl fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shutdown completed with {} failure(s): ", self.failures.len())?;
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_is_observed_by_late_waiters() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_triggered());

        shutdown.clone().trigger();
        assert!(shutdown.is_triggered());
        tokio::time::timeout(Duration::from_secs(1), shutdown.triggered())
            .await
            .unwrap();
    }

    #[test]
    fn error_lists_every_failure() {
        let err = ShutdownError::from_failures(vec![
            ShutdownFailure::Stuck {
                component: "slow".into(),
                timeout: Duration::from_millis(100),
            },
            ShutdownFailure::Stop {
                component: "db".into(),
                error: StopError::Failed("flush failed".into()),
            },
        ])
        .unwrap();

        let text = err.to_string();
        assert!(text.starts_with("shutdown completed with 2 failure(s)"));
        assert!(text.contains("'slow' did not stop"));
        assert!(text.contains("flush failed"));
        assert_eq!(err.stuck_components(), vec!["slow"]);
    }

    #[test]
    fn no_failures_means_no_error() {
        assert!(ShutdownError::from_failures(Vec::new()).is_none());
    }
}
