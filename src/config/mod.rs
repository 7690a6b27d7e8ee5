//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! Component::init_flags
//!     → flags.rs (FlagSet: prefix-qualified keys, defaults, help)
//!     → loader.rs (defaults → TOML file → environment → overrides)
//!     → resolved.rs (ResolvedConfig, immutable)
//!     → ConfigView per prefix → Component::configure
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs resolves again with the same FlagSet
//!     → new ResolvedConfig published on a channel
//!     → consumers rebuild typed config (schema.rs) and reload
//! ```
//!
//! # Design Decisions
//! - No process-wide flag state: the FlagSet is an explicit value
//! - Config is resolved exactly once per (re)load; changes require full reload
//! - Every option has a default so minimal configs work

pub mod flags;
pub mod loader;
pub mod resolved;
pub mod schema;
pub mod watcher;

pub use flags::{FlagDef, FlagError, FlagKind, FlagSet, FlagValue, ScopedFlags};
pub use loader::{ConfigError, ConfigLoader};
pub use resolved::{ConfigView, ResolvedConfig, ResolvedValue, ValueSource};
pub use schema::ListenerConfig;
pub use watcher::ConfigWatcher;
