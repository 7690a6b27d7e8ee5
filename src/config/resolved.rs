//! Resolved configuration values and per-component views.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use super::flags::{qualify, FlagKind, FlagValue};
use super::loader::ConfigError;

/// Where a resolved value came from, lowest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueSource {
    /// The option's registered default.
    Default,
    /// The configuration file.
    File,
    /// An environment variable.
    Env,
    /// An explicit `key=value` override.
    Override,
}

impl fmt::Display for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Default => "default",
            Self::File => "file",
            Self::Env => "env",
            Self::Override => "override",
        })
    }
}

/// A single resolved option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedValue {
    /// The effective value.
    pub value: FlagValue,
    /// The source that supplied it.
    pub source: ValueSource,
}

/// Every registered option with its effective value.
///
/// Immutable once produced by the loader; reloads produce a new instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedConfig {
    values: BTreeMap<String, ResolvedValue>,
}

impl ResolvedConfig {
    pub(crate) fn insert(&mut self, key: String, value: FlagValue, source: ValueSource) {
        self.values.insert(key, ResolvedValue { value, source });
    }

    /// The resolved entry for a fully qualified key.
    pub fn get(&self, key: &str) -> Option<&ResolvedValue> {
        self.values.get(key)
    }

    /// A read-only view of the keys under `prefix`.
    pub fn view<'a>(&'a self, prefix: &'a str) -> ConfigView<'a> {
        ConfigView {
            config: self,
            prefix,
        }
    }

    /// All entries, sorted by key.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResolvedValue)> + '_ {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of resolved options.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing was resolved.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Prefix-scoped, typed access handed to [`Component::configure`](crate::component::Component::configure).
#[derive(Debug, Clone, Copy)]
pub struct ConfigView<'a> {
    config: &'a ResolvedConfig,
    prefix: &'a str,
}

impl<'a> ConfigView<'a> {
    /// The prefix this view is scoped to.
    pub fn prefix(&self) -> &str {
        self.prefix
    }

    /// Read an integer option.
    pub fn int(&self, name: &str) -> Result<i64, ConfigError> {
        match self.lookup(name)? {
            FlagValue::Int(v) => Ok(*v),
            other => Err(self.mismatch(name, FlagKind::Int, other)),
        }
    }

    /// Read a string option.
    pub fn string(&self, name: &str) -> Result<&'a str, ConfigError> {
        match self.lookup(name)? {
            FlagValue::Str(v) => Ok(v.as_str()),
            other => Err(self.mismatch(name, FlagKind::Str, other)),
        }
    }

    /// Read a boolean option.
    pub fn bool(&self, name: &str) -> Result<bool, ConfigError> {
        match self.lookup(name)? {
            FlagValue::Bool(v) => Ok(*v),
            other => Err(self.mismatch(name, FlagKind::Bool, other)),
        }
    }

    fn lookup(&self, name: &str) -> Result<&'a FlagValue, ConfigError> {
        let key = qualify(self.prefix, name);
        self.config
            .values
            .get(&key)
            .map(|resolved| &resolved.value)
            .ok_or(ConfigError::Missing { key })
    }

    fn mismatch(&self, name: &str, expected: FlagKind, found: &FlagValue) -> ConfigError {
        ConfigError::TypeMismatch {
            key: qualify(self.prefix, name),
            expected,
            found: found.kind(),
        }
    }
}
