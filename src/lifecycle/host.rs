//! The lifecycle coordinator.
//!
//! # Responsibilities
//! - Drive init_flags → resolve → configure sequentially, in registration order
//! - Launch every component's `run` concurrently
//! - Wait for a signal, a shutdown request or a fatal run error
//! - Fan out `stop`, bound it with a deadline, aggregate every failure
//!
//! # Design Decisions
//! - One host per process; phases only move forward, no restart
//! - `shutdown` is memoized: later calls return the first outcome
//! - Run panics are caught and reported like run errors

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use futures_util::FutureExt;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::OnceCell;
use tokio::task::JoinSet;
use tracing::Instrument;

use super::shutdown::{Shutdown, ShutdownError, ShutdownFailure};
use super::signals;
use crate::component::{ComponentError, ComponentState, Registry};
use crate::config::{ConfigError, ConfigLoader, FlagError, FlagSet, ResolvedConfig};
use crate::observability::{component_span, metrics, TelemetryError, TelemetryProvider, TelemetryShutdown};

/// Default bound on how long `start` waits for components to stop.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Phase of the whole host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPhase {
    /// Built, nothing called yet.
    Created,
    /// Options registered; configuration not yet accepted.
    FlagsBound,
    /// Every component accepted its configuration.
    Configured,
    /// Components are running.
    Running,
    /// Stop fan-out in progress.
    Stopping,
    /// Shutdown finished.
    Stopped,
}

impl std::fmt::Display for HostPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::FlagsBound => "flags-bound",
            Self::Configured => "configured",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        })
    }
}

/// Error type for host operations.
#[derive(Debug, Error)]
pub enum HostError {
    /// The operation is not valid in the current phase.
    #[error("cannot {operation} while the host is {phase}")]
    InvalidPhase {
        /// The attempted operation.
        operation: &'static str,
        /// The phase the host was in.
        phase: HostPhase,
    },

    /// A component failed to register its options.
    #[error("component '{component}' failed to register options: {source}")]
    Flags {
        /// Component name.
        component: String,
        /// Underlying registration error.
        #[source]
        source: FlagError,
    },

    /// Configuration could not be resolved.
    #[error("failed to resolve configuration: {0}")]
    Config(#[from] ConfigError),

    /// A component rejected its configuration.
    #[error("component '{component}' (prefix '{prefix}') rejected its configuration: {source}")]
    Configure {
        /// Component name.
        component: String,
        /// Component prefix.
        prefix: String,
        /// The component's error.
        #[source]
        source: ComponentError,
    },

    /// The telemetry exporter could not be installed.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    /// Shutdown finished with failures.
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

/// Builder for [`Host`].
pub struct HostBuilder {
    registry: Registry,
    loader: ConfigLoader,
    telemetry: Option<Box<dyn TelemetryProvider>>,
    shutdown_timeout: Duration,
}

impl HostBuilder {
    /// Resolve configuration with `loader` instead of defaults plus environment.
    pub fn config_loader(mut self, loader: ConfigLoader) -> Self {
        self.loader = loader;
        self
    }

    /// Install a telemetry exporter when the host starts.
    pub fn telemetry(mut self, provider: impl TelemetryProvider + 'static) -> Self {
        self.telemetry = Some(Box::new(provider));
        self
    }

    /// Deadline `start` applies to the shutdown it performs.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Build the host.
    pub fn build(self) -> Host {
        Host {
            registry: Arc::new(self.registry),
            loader: self.loader,
            telemetry: self.telemetry,
            shutdown_timeout: self.shutdown_timeout,
            shutdown: Shutdown::new(),
            phase: Mutex::new(HostPhase::Created),
            flags: Mutex::new(None),
            telemetry_shutdown: Mutex::new(None),
            run_failures: Mutex::new(Vec::new()),
            outcome: OnceCell::new(),
        }
    }
}

struct RunExit {
    name: String,
    critical: bool,
    outcome: Result<(), ComponentError>,
}

/// Drives the lifecycle of every registered component.
pub struct Host {
    registry: Arc<Registry>,
    loader: ConfigLoader,
    telemetry: Option<Box<dyn TelemetryProvider>>,
    shutdown_timeout: Duration,
    shutdown: Shutdown,
    phase: Mutex<HostPhase>,
    flags: Mutex<Option<FlagSet>>,
    telemetry_shutdown: Mutex<Option<TelemetryShutdown>>,
    run_failures: Mutex<Vec<ShutdownFailure>>,
    outcome: OnceCell<Result<(), ShutdownError>>,
}

impl Host {
    /// Start building a host around `registry`.
    pub fn builder(registry: Registry) -> HostBuilder {
        HostBuilder {
            registry,
            loader: ConfigLoader::new(),
            telemetry: None,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// A host with default settings.
    pub fn new(registry: Registry) -> Self {
        Self::builder(registry).build()
    }

    /// The hosted components.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Current phase.
    pub fn phase(&self) -> HostPhase {
        *self.phase.lock()
    }

    /// Handle that requests shutdown when triggered.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// The loader used by `init`.
    pub fn config_loader(&self) -> &ConfigLoader {
        &self.loader
    }

    /// Options registered during `init`, once it has run.
    pub fn flags(&self) -> Option<FlagSet> {
        self.flags.lock().clone()
    }

    /// Register options, resolve configuration once, configure every component.
    ///
    /// Stops at the first failing component; components configured before it
    /// stay configured and later ones are never configured.
    pub fn init(&self) -> Result<ResolvedConfig, HostError> {
        self.advance("init", HostPhase::Created, HostPhase::FlagsBound)?;

        let mut flags = FlagSet::new();
        for component in self.registry.iter() {
            let span = component_span(component.name(), component.prefix());
            let _entered = span.enter();
            component
                .init_flags(&mut flags.scoped(component.name(), component.prefix()))
                .map_err(|source| HostError::Flags {
                    component: component.name().to_string(),
                    source,
                })?;
            self.registry.set_state(component.name(), ComponentState::FlagsBound);
        }

        let resolved = self.loader.resolve(&flags)?;
        *self.flags.lock() = Some(flags);

        for component in self.registry.iter() {
            let span = component_span(component.name(), component.prefix());
            let _entered = span.enter();
            if let Err(source) = component.configure(&resolved.view(component.prefix())) {
                tracing::error!(error = %source, "Component rejected its configuration");
                return Err(HostError::Configure {
                    component: component.name().to_string(),
                    prefix: component.prefix().to_string(),
                    source,
                });
            }
            self.registry.set_state(component.name(), ComponentState::Configured);
            tracing::debug!("Component configured");
        }

        *self.phase.lock() = HostPhase::Configured;
        tracing::info!(
            components = self.registry.len(),
            options = resolved.len(),
            "Host initialized"
        );
        Ok(resolved)
    }

    /// Run every component until an interrupt signal, then shut down.
    pub async fn start(&self) -> Result<(), HostError> {
        self.start_until(signals::interrupt()).await
    }

    /// Run every component until `signal` resolves, a shutdown is requested or
    /// a critical component fails, then shut down with the configured timeout.
    pub async fn start_until<F>(&self, signal: F) -> Result<(), HostError>
    where
        F: Future<Output = ()> + Send,
    {
        self.advance("start", HostPhase::Configured, HostPhase::Running)?;

        if let Some(provider) = &self.telemetry {
            match provider.setup() {
                Ok(shutdown) => {
                    *self.telemetry_shutdown.lock() = Some(shutdown);
                    tracing::info!(provider = provider.name(), "Telemetry installed");
                }
                Err(e) => {
                    *self.phase.lock() = HostPhase::Stopped;
                    return Err(e.into());
                }
            }
        }

        let mut runs = JoinSet::new();
        for component in self.registry.iter() {
            let component = Arc::clone(component);
            let span = component_span(component.name(), component.prefix());
            self.registry.set_state(component.name(), ComponentState::Running);
            runs.spawn(
                async move {
                    let name = component.name().to_string();
                    let critical = component.is_critical();
                    let outcome = AssertUnwindSafe(component.run())
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| Err(ComponentError::other(panic_message(&*panic))));
                    RunExit {
                        name,
                        critical,
                        outcome,
                    }
                }
                .instrument(span),
            );
        }
        tracing::info!(components = runs.len(), "Host running");

        let cause = tokio::select! {
            _ = signal => "signal",
            _ = self.shutdown.triggered() => "requested",
            _ = self.supervise(&mut runs) => "fatal run error",
        };
        tracing::info!(cause, "Host shutting down");

        let result = self.shutdown(self.shutdown_timeout).await;
        self.drain(&mut runs).await;
        result.map_err(HostError::from)
    }

    /// Stop every component concurrently and wait for their acknowledgments.
    ///
    /// Components that do not acknowledge within `timeout` are reported as
    /// stuck. Safe to call more than once and from several tasks: only the
    /// first call stops components, every call returns the same outcome.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), ShutdownError> {
        self.shutdown.trigger();
        self.outcome
            .get_or_init(|| self.stop_all(timeout))
            .await
            .clone()
    }

    async fn stop_all(&self, timeout: Duration) -> Result<(), ShutdownError> {
        *self.phase.lock() = HostPhase::Stopping;
        let started = Instant::now();
        tracing::info!(components = self.registry.len(), ?timeout, "Stopping components");

        let stops: Vec<_> = self
            .registry
            .iter()
            .map(|component| {
                let name = component.name().to_string();
                let span = component_span(component.name(), component.prefix());
                self.registry.set_state(&name, ComponentState::Stopping);
                let handle = {
                    let _entered = span.enter();
                    component.stop()
                };
                async move { (name, tokio::time::timeout(timeout, handle).await) }.instrument(span)
            })
            .collect();
        let acks = join_all(stops).await;

        let mut failures = std::mem::take(&mut *self.run_failures.lock());
        for (name, ack) in acks {
            match ack {
                Ok(Ok(())) => self.registry.set_state(&name, ComponentState::Stopped),
                Ok(Err(error)) => {
                    tracing::warn!(component = %name, error = %error, "Component stopped with an error");
                    self.registry.set_state(&name, ComponentState::Failed);
                    failures.push(ShutdownFailure::Stop {
                        component: name,
                        error,
                    });
                }
                Err(_) => {
                    tracing::error!(component = %name, ?timeout, "Component did not acknowledge stop");
                    self.registry.set_state(&name, ComponentState::Failed);
                    failures.push(ShutdownFailure::Stuck {
                        component: name,
                        timeout,
                    });
                }
            }
        }

        let telemetry = self.telemetry_shutdown.lock().take();
        if let Some(telemetry) = telemetry {
            match tokio::time::timeout(timeout, telemetry()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Telemetry shutdown failed");
                    failures.push(ShutdownFailure::Telemetry(e));
                }
                Err(_) => {
                    tracing::error!(?timeout, "Telemetry shutdown did not finish");
                    failures.push(ShutdownFailure::Telemetry(TelemetryError::Shutdown(format!(
                        "timed out after {timeout:?}"
                    ))));
                }
            }
        }

        let elapsed = started.elapsed();
        metrics::record_shutdown(elapsed);
        for failure in &failures {
            metrics::record_shutdown_failure(failure.kind());
        }
        *self.phase.lock() = HostPhase::Stopped;

        match ShutdownError::from_failures(failures) {
            None => {
                tracing::info!(?elapsed, "Shutdown complete");
                Ok(())
            }
            Some(err) => {
                tracing::error!(?elapsed, error = %err, "Shutdown completed with failures");
                Err(err)
            }
        }
    }

    /// Resolves when a critical component's `run` fails. Never resolves otherwise.
    async fn supervise(&self, runs: &mut JoinSet<RunExit>) {
        while let Some(joined) = runs.join_next().await {
            let exit = match joined {
                Ok(exit) => exit,
                Err(e) => {
                    tracing::warn!(error = %e, "Component run task ended abnormally");
                    continue;
                }
            };
            match exit.outcome {
                Ok(()) => {
                    metrics::record_component_run(&exit.name, "ok");
                    tracing::debug!(component = %exit.name, "Component run finished");
                }
                Err(error) => {
                    metrics::record_component_run(&exit.name, "error");
                    self.registry.set_state(&exit.name, ComponentState::Failed);
                    if exit.critical {
                        tracing::error!(component = %exit.name, error = %error, "Critical component failed");
                        self.run_failures.lock().push(ShutdownFailure::Run {
                            component: exit.name,
                            error: Arc::new(error),
                        });
                        return;
                    }
                    tracing::warn!(component = %exit.name, error = %error, "Non-critical component failed");
                }
            }
        }
        std::future::pending::<()>().await;
    }

    /// Collect runs that finish after shutdown; abort the ones that never do.
    async fn drain(&self, runs: &mut JoinSet<RunExit>) {
        let drained = tokio::time::timeout(self.shutdown_timeout, async {
            while let Some(joined) = runs.join_next().await {
                if let Ok(RunExit {
                    name,
                    outcome: Err(error),
                    ..
                }) = joined
                {
                    metrics::record_component_run(&name, "error");
                    tracing::warn!(component = %name, error = %error, "Component run failed during shutdown");
                }
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(remaining = runs.len(), "Aborting component runs that outlived shutdown");
            runs.shutdown().await;
        }
    }

    fn advance(&self, operation: &'static str, from: HostPhase, to: HostPhase) -> Result<(), HostError> {
        let mut phase = self.phase.lock();
        if *phase != from {
            return Err(HostError::InvalidPhase {
                operation,
                phase: *phase,
            });
        }
        *phase = to;
        Ok(())
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("registry", &self.registry)
            .field("phase", &self.phase())
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked".to_string()
    }
}
