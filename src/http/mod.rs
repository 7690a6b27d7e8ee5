//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted TCP connection (net::KeepAliveListener)
//!     → middleware.rs (request id, tracing, panic recovery, timeout)
//!     → request.rs (request id generation and lookup)
//!     → registered route handlers (Axum router)
//!     → Send to client
//!
//! Lifecycle (server.rs):
//!     add_handler* → run (freeze, bind, serve) → reload* → stop
//! ```

pub mod middleware;
pub mod request;
pub mod server;

pub use request::{RequestIdExt, UuidRequestId, X_REQUEST_ID};
pub use server::{HttpListener, ListenerError, DEFAULT_LISTENER_NAME};
