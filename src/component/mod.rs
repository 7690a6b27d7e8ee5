//! Component contract subsystem.
//!
//! # Data Flow
//! ```text
//! Component (trait object, owned by the Registry)
//!     → init_flags   (register options under its prefix)
//!     → configure    (validate resolved values)
//!     → run          (block serving, or return after one-shot setup)
//!     → stop         (detached cleanup, acknowledged through StopHandle)
//! ```
//!
//! # Design Decisions
//! - Methods take `&self`; components keep their mutable state behind locks
//!   because `run` and `stop` are called from different tasks
//! - `run` errors are fatal to the host unless `is_critical` says otherwise
//! - Stop failures travel in the `StopHandle`, not only in logs

pub mod registry;
pub mod stop;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{ConfigError, ConfigView, FlagError, ScopedFlags};

pub use registry::{Registry, RegistryError};
pub use stop::{StopAck, StopError, StopHandle};

/// A pluggable unit hosted by the lifecycle coordinator.
#[async_trait]
pub trait Component: Send + Sync + 'static {
    /// Stable identifier used in logs and for registry lookups.
    fn name(&self) -> &str;

    /// Namespace for configuration keys and log fields.
    fn prefix(&self) -> &str {
        self.name()
    }

    /// Register this component's options. Keys are qualified with the prefix.
    fn init_flags(&self, flags: &mut ScopedFlags<'_>) -> Result<(), FlagError>;

    /// Validate the resolved configuration visible under the prefix.
    fn configure(&self, config: &ConfigView<'_>) -> Result<(), ComponentError>;

    /// Run the component. May block until stopped or return immediately.
    async fn run(&self) -> Result<(), ComponentError>;

    /// Begin graceful shutdown; the handle resolves once it has completed.
    fn stop(&self) -> StopHandle;

    /// Whether a `run` error should bring down the whole host.
    fn is_critical(&self) -> bool {
        true
    }
}

/// Lifecycle state of a registered component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    /// Registered, nothing called yet.
    Created,
    /// Options registered.
    FlagsBound,
    /// Configuration validated.
    Configured,
    /// `run` launched.
    Running,
    /// `stop` requested, waiting for the acknowledgment.
    Stopping,
    /// Stop acknowledged.
    Stopped,
    /// `run` or `stop` reported an error.
    Failed,
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Created => "created",
            Self::FlagsBound => "flags-bound",
            Self::Configured => "configured",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Error returned by a component's `configure` or `run`.
#[derive(Debug, Error)]
pub enum ComponentError {
    /// Required values are missing or inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A configuration value could not be read.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// I/O failure while running.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Component-specific failure.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl ComponentError {
    /// Wrap a component-specific error.
    pub fn other(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Other(error.into())
    }
}
