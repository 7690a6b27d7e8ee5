//! Stop acknowledgment handle.
//!
//! # Responsibilities
//! - Carry exactly one completion value from a component's detached stop task
//! - Surface stop-time failures to the caller instead of swallowing them
//!
//! # Design Decisions
//! - Backed by a `oneshot` channel: one send, one receive
//! - A dropped sender resolves as `StopError::Abandoned`, never a hang

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::Instrument;

/// Failure reported by a component while stopping.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StopError {
    /// In-flight work did not drain within the grace period and was aborted.
    #[error("graceful shutdown exceeded {grace:?}, remaining work aborted")]
    GraceExceeded {
        /// The grace period that was exceeded.
        grace: Duration,
    },

    /// The stop task ended without acknowledging.
    #[error("stop task ended without acknowledging")]
    Abandoned,

    /// The component reported a failure while releasing its resources.
    #[error("{0}")]
    Failed(String),
}

/// Future returned by [`Component::stop`](super::Component::stop).
///
/// Resolves exactly once, after the component has finished shutting down.
#[derive(Debug)]
#[must_use = "a stop handle does nothing unless awaited"]
pub struct StopHandle {
    rx: oneshot::Receiver<Result<(), StopError>>,
}

impl StopHandle {
    /// Create a handle together with the sender the stop task acknowledges on.
    pub fn channel() -> (StopAck, Self) {
        let (tx, rx) = oneshot::channel();
        (StopAck { tx }, Self { rx })
    }

    /// A handle that is already acknowledged.
    ///
    /// For components with nothing to release.
    pub fn ready() -> Self {
        Self::completed(Ok(()))
    }

    /// A handle that is already resolved with the given outcome.
    pub fn completed(outcome: Result<(), StopError>) -> Self {
        let (ack, handle) = Self::channel();
        ack.send(outcome);
        handle
    }

    /// Run `cleanup` on a detached task and acknowledge with its outcome.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<F>(cleanup: F) -> Self
    where
        F: Future<Output = Result<(), StopError>> + Send + 'static,
    {
        let (ack, handle) = Self::channel();
        tokio::spawn(
            async move {
                ack.send(cleanup.await);
            }
            .in_current_span(),
        );
        handle
    }
}

impl Future for StopHandle {
    type Output = Result<(), StopError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(StopError::Abandoned)))
    }
}

/// Sending half of a [`StopHandle`].
#[derive(Debug)]
pub struct StopAck {
    tx: oneshot::Sender<Result<(), StopError>>,
}

impl StopAck {
    /// Acknowledge the stop. Consumes the sender, so it can only happen once.
    pub fn send(self, outcome: Result<(), StopError>) {
        if self.tx.send(outcome).is_err() {
            tracing::trace!("stop acknowledged after the waiter went away");
        }
    }
}
