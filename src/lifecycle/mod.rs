//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Init (host.rs):
//!     init_flags (in order) → resolve config once → configure (in order)
//!
//! Start (host.rs):
//!     run every component concurrently
//!     → wait for signal | shutdown request | critical run error
//!
//! Shutdown (host.rs, shutdown.rs):
//!     stop every component concurrently → bounded wait for acks
//!     → telemetry shutdown → aggregated ShutdownError
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → shutdown
//! ```
//!
//! # Design Decisions
//! - Sequential configure: the first failure aborts, later components stay untouched
//! - Parallel stop: total time is bounded by the slowest component, not the sum
//! - Shutdown has a deadline; unacknowledged components are named in the error

pub mod host;
pub mod shutdown;
pub mod signals;

pub use host::{Host, HostBuilder, HostError, HostPhase, DEFAULT_SHUTDOWN_TIMEOUT};
pub use shutdown::{Shutdown, ShutdownError, ShutdownFailure};
