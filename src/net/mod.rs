//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Configured address + port
//!     → listener.rs (format, bind, resolve ephemeral port)
//!     → accept loop (keep-alive on every socket)
//!     → Hand off to HTTP layer (one hyper connection task per socket)
//! ```
//!
//! # Design Decisions
//! - Literal IPv6 hosts are bracketed before binding
//! - Keep-alive is set per accepted socket, not on the listening socket
//! - Accept errors are logged and retried; they never end the serve loop

pub mod listener;

pub use listener::{format_bind_addr, KeepAliveListener, KEEPALIVE_PERIOD};
