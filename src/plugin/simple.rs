//! A minimal one-shot component with a single string option.
//!
//! Useful as a template and for wiring checks: it registers `{prefix}.value`,
//! rejects an empty value, returns from `run` at once and stops instantly.

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::component::{Component, ComponentError, StopHandle};
use crate::config::{ConfigView, FlagError, ScopedFlags};

/// Default for the `value` option.
pub const DEFAULT_VALUE: &str = "default value";

/// Holds one configured string.
#[derive(Debug)]
pub struct SimplePlugin {
    name: String,
    value: RwLock<String>,
}

impl SimplePlugin {
    /// A plugin named (and prefixed) `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: RwLock::new(String::new()),
        }
    }

    /// The configured value; empty before `configure`.
    pub fn value(&self) -> String {
        self.value.read().clone()
    }
}

#[async_trait]
impl Component for SimplePlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn init_flags(&self, flags: &mut ScopedFlags<'_>) -> Result<(), FlagError> {
        flags.string("value", DEFAULT_VALUE, "Some value of the simple plugin")
    }

    fn configure(&self, config: &ConfigView<'_>) -> Result<(), ComponentError> {
        let value = config.string("value")?;
        if value.is_empty() {
            return Err(ComponentError::InvalidConfig(format!(
                "{}.value must not be empty",
                config.prefix()
            )));
        }
        *self.value.write() = value.to_string();
        Ok(())
    }

    async fn run(&self) -> Result<(), ComponentError> {
        tracing::debug!(value = %self.value(), "Simple plugin ready");
        Ok(())
    }

    fn stop(&self) -> StopHandle {
        StopHandle::ready()
    }
}
