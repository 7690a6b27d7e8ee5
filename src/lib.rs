//! Component host library.
//!
//! Assembles independently written components (an HTTP listener, telemetry,
//! business plugins) into one process with an ordered lifecycle:
//! option registration → configuration → concurrent run → graceful shutdown.

// Core
pub mod component;
pub mod config;
pub mod lifecycle;

// Bundled components
pub mod http;
pub mod net;
pub mod plugin;

// Cross-cutting concerns
pub mod observability;

pub use component::{Component, ComponentError, ComponentState, Registry, StopHandle};
pub use http::HttpListener;
pub use lifecycle::{Host, HostError, Shutdown};
