//! Bundled components beyond the HTTP listener.

pub mod simple;

pub use simple::SimplePlugin;
