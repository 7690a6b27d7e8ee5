//! Option registration.
//!
//! # Responsibilities
//! - Collect every component's options with their defaults and help text
//! - Qualify option names with the owning component's prefix
//! - Reject duplicate keys at registration time
//!
//! # Design Decisions
//! - An explicit `FlagSet` value replaces process-wide flag state; it is
//!   built once by the host and handed to the loader
//! - Values are a small closed set of kinds (int, string, bool)

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Error type for option registration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FlagError {
    /// The key was already registered.
    #[error("option '{key}' is already registered by '{owner}'")]
    Duplicate {
        /// The fully qualified key.
        key: String,
        /// Component that registered it first.
        owner: String,
    },
}

/// The kind of value an option holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagKind {
    /// Signed integer.
    Int,
    /// UTF-8 string.
    Str,
    /// Boolean.
    Bool,
}

impl fmt::Display for FlagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Int => "int",
            Self::Str => "string",
            Self::Bool => "bool",
        })
    }
}

/// A typed option value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FlagValue {
    /// Signed integer.
    Int(i64),
    /// UTF-8 string.
    Str(String),
    /// Boolean.
    Bool(bool),
}

impl FlagValue {
    /// The kind of this value.
    pub fn kind(&self) -> FlagKind {
        match self {
            Self::Int(_) => FlagKind::Int,
            Self::Str(_) => FlagKind::Str,
            Self::Bool(_) => FlagKind::Bool,
        }
    }

    /// Parse raw text (environment, command line) as a value of `kind`.
    ///
    /// Returns `None` when the text is not a valid value of that kind.
    pub fn parse(kind: FlagKind, raw: &str) -> Option<Self> {
        match kind {
            FlagKind::Int => raw.trim().parse().ok().map(Self::Int),
            FlagKind::Str => Some(Self::Str(raw.to_string())),
            FlagKind::Bool => match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Some(Self::Bool(true)),
                "0" | "false" | "no" | "off" => Some(Self::Bool(false)),
                _ => None,
            },
        }
    }
}

impl fmt::Display for FlagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v:?}"),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// A registered option.
#[derive(Debug, Clone, Serialize)]
pub struct FlagDef {
    /// Fully qualified key, `"{prefix}.{name}"`.
    pub key: String,
    /// Value used when no source overrides it.
    pub default: FlagValue,
    /// One-line description.
    pub help: String,
    /// Name of the component that registered the option.
    pub owner: String,
}

impl FlagDef {
    /// The kind of value this option accepts.
    pub fn kind(&self) -> FlagKind {
        self.default.kind()
    }
}

/// Every option registered by the hosted components.
#[derive(Debug, Clone, Default)]
pub struct FlagSet {
    defs: BTreeMap<String, FlagDef>,
}

impl FlagSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registration view that qualifies names with `prefix`.
    pub fn scoped<'a>(&'a mut self, owner: &'a str, prefix: &'a str) -> ScopedFlags<'a> {
        ScopedFlags {
            set: self,
            owner,
            prefix,
        }
    }

    /// Look up an option by its fully qualified key.
    pub fn get(&self, key: &str) -> Option<&FlagDef> {
        self.defs.get(key)
    }

    /// All options, sorted by key.
    pub fn iter(&self) -> impl Iterator<Item = &FlagDef> + '_ {
        self.defs.values()
    }

    /// Number of registered options.
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    fn insert(&mut self, def: FlagDef) -> Result<(), FlagError> {
        if let Some(existing) = self.defs.get(&def.key) {
            return Err(FlagError::Duplicate {
                key: def.key,
                owner: existing.owner.clone(),
            });
        }
        self.defs.insert(def.key.clone(), def);
        Ok(())
    }
}

/// Registration view handed to [`Component::init_flags`](crate::component::Component::init_flags).
#[derive(Debug)]
pub struct ScopedFlags<'a> {
    set: &'a mut FlagSet,
    owner: &'a str,
    prefix: &'a str,
}

impl ScopedFlags<'_> {
    /// Register an integer option.
    pub fn int(&mut self, name: &str, default: i64, help: &str) -> Result<(), FlagError> {
        self.add(name, FlagValue::Int(default), help)
    }

    /// Register a string option.
    pub fn string(&mut self, name: &str, default: &str, help: &str) -> Result<(), FlagError> {
        self.add(name, FlagValue::Str(default.to_string()), help)
    }

    /// Register a boolean option.
    pub fn bool(&mut self, name: &str, default: bool, help: &str) -> Result<(), FlagError> {
        self.add(name, FlagValue::Bool(default), help)
    }

    /// The prefix keys are qualified with.
    pub fn prefix(&self) -> &str {
        self.prefix
    }

    fn add(&mut self, name: &str, default: FlagValue, help: &str) -> Result<(), FlagError> {
        self.set.insert(FlagDef {
            key: qualify(self.prefix, name),
            default,
            help: help.to_string(),
            owner: self.owner.to_string(),
        })
    }
}

/// Join a prefix and an option name into a fully qualified key.
pub fn qualify(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_prefix_qualified() {
        let mut set = FlagSet::new();
        let mut flags = set.scoped("http", "http");
        flags.int("port", 3000, "listen port").unwrap();
        flags.string("bind_address", "", "bind address").unwrap();

        let port = set.get("http.port").unwrap();
        assert_eq!(port.default, FlagValue::Int(3000));
        assert_eq!(port.owner, "http");
        assert!(set.get("http.bind_address").is_some());
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn duplicate_key_is_rejected() {
        let mut set = FlagSet::new();
        set.scoped("a", "shared").bool("debug", false, "").unwrap();

        let err = set.scoped("b", "shared").bool("debug", true, "").unwrap_err();
        assert_eq!(
            err,
            FlagError::Duplicate {
                key: "shared.debug".into(),
                owner: "a".into()
            }
        );
        assert_eq!(set.get("shared.debug").unwrap().default, FlagValue::Bool(false));
    }

    #[test]
    fn parses_raw_values_by_kind() {
        assert_eq!(FlagValue::parse(FlagKind::Int, " 42 "), Some(FlagValue::Int(42)));
        assert_eq!(FlagValue::parse(FlagKind::Int, "4x"), None);
        assert_eq!(FlagValue::parse(FlagKind::Bool, "ON"), Some(FlagValue::Bool(true)));
        assert_eq!(FlagValue::parse(FlagKind::Bool, "maybe"), None);
        assert_eq!(
            FlagValue::parse(FlagKind::Str, " spaced "),
            Some(FlagValue::Str(" spaced ".into()))
        );
    }

    #[test]
    fn empty_prefix_keeps_bare_name() {
        assert_eq!(qualify("", "level"), "level");
        assert_eq!(qualify("log", "level"), "log.level");
    }
}
