//! Typed configuration for the built-in components.
//!
//! Each schema type knows the options it registers and how to build itself
//! from a resolved [`ConfigView`].

use std::time::Duration;

use super::flags::{FlagError, ScopedFlags};
use super::resolved::ConfigView;
use crate::component::ComponentError;

/// Port used when none is configured.
pub const DEFAULT_PORT: u16 = 3000;

/// Listener configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerConfig {
    /// TCP port. `0` asks the OS for an ephemeral port.
    pub port: u16,

    /// Bind address (e.g. "127.0.0.1", "::1"). Empty means all IPv4 interfaces.
    pub bind_address: String,

    /// Skip the default middleware stack (request id, tracing, panic recovery, timeout).
    pub disable_default_middleware: bool,

    /// Keep the default stack but drop per-request logging.
    pub disable_request_logging: bool,

    /// Per-request timeout.
    pub request_timeout: Duration,

    /// How long in-flight requests may run after a stop before being aborted.
    pub shutdown_grace: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: String::new(),
            disable_default_middleware: false,
            disable_request_logging: false,
            request_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl ListenerConfig {
    /// Register the listener's options.
    pub fn register(flags: &mut ScopedFlags<'_>) -> Result<(), FlagError> {
        let defaults = Self::default();
        flags.int(
            "port",
            i64::from(defaults.port),
            "listen port; 0 picks a random free port",
        )?;
        flags.string("bind_address", &defaults.bind_address, "bind address")?;
        flags.bool(
            "no_default_middleware",
            defaults.disable_default_middleware,
            "disable the default middleware stack",
        )?;
        flags.bool(
            "no_request_logging",
            defaults.disable_request_logging,
            "disable per-request logging",
        )?;
        flags.int(
            "request_timeout_secs",
            secs_i64(defaults.request_timeout),
            "per-request timeout in seconds",
        )?;
        flags.int(
            "shutdown_grace_secs",
            secs_i64(defaults.shutdown_grace),
            "grace period for in-flight requests on stop, in seconds",
        )?;
        Ok(())
    }

    /// Build and validate from resolved values.
    pub fn from_view(view: &ConfigView<'_>) -> Result<Self, ComponentError> {
        let port = view.int("port")?;
        let port = u16::try_from(port).map_err(|_| {
            ComponentError::InvalidConfig(format!(
                "{}.port must be between 0 and 65535, got {port}",
                view.prefix()
            ))
        })?;

        Ok(Self {
            port,
            bind_address: view.string("bind_address")?.trim().to_string(),
            disable_default_middleware: view.bool("no_default_middleware")?,
            disable_request_logging: view.bool("no_request_logging")?,
            request_timeout: positive_secs(view, "request_timeout_secs")?,
            shutdown_grace: non_negative_secs(view, "shutdown_grace_secs")?,
        })
    }
}

fn secs_i64(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

fn positive_secs(view: &ConfigView<'_>, name: &str) -> Result<Duration, ComponentError> {
    match view.int(name)? {
        secs if secs > 0 => Ok(Duration::from_secs(secs.unsigned_abs())),
        secs => Err(ComponentError::InvalidConfig(format!(
            "{}.{name} must be positive, got {secs}",
            view.prefix()
        ))),
    }
}

fn non_negative_secs(view: &ConfigView<'_>, name: &str) -> Result<Duration, ComponentError> {
    match view.int(name)? {
        secs if secs >= 0 => Ok(Duration::from_secs(secs.unsigned_abs())),
        secs => Err(ComponentError::InvalidConfig(format!(
            "{}.{name} must not be negative, got {secs}",
            view.prefix()
        ))),
    }
}
