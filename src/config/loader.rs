//! Configuration loading.
//!
//! # Responsibilities
//! - Resolve every registered option exactly once, before any `configure`
//! - Layer sources: default → TOML file → environment → explicit overrides
//! - Reject unknown keys and values that do not parse as the option's kind

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::flags::{FlagKind, FlagSet, FlagValue};
use super::resolved::{ResolvedConfig, ValueSource};

/// Error type for configuration loading and lookup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file '{}': {source}", path.display())]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML.
    #[error("failed to parse config file '{}': {source}", path.display())]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },

    /// A source names an option nobody registered.
    #[error("unknown option '{key}' ({origin})")]
    UnknownKey {
        /// The unknown key.
        key: String,
        /// The source it appeared in.
        origin: ValueSource,
    },

    /// A value does not parse as the option's kind.
    #[error("invalid value {raw} for {kind} option '{key}' ({origin})")]
    InvalidValue {
        /// The option key.
        key: String,
        /// The kind the option expects.
        kind: FlagKind,
        /// The offending value as written.
        raw: String,
        /// The source it appeared in.
        origin: ValueSource,
    },

    /// An override is not of the form `KEY=VALUE`.
    #[error("malformed override '{0}', expected KEY=VALUE")]
    MalformedOverride(String),

    /// A component asked for an option that was never registered.
    #[error("option '{key}' is not set")]
    Missing {
        /// The requested key.
        key: String,
    },

    /// A component asked for an option as the wrong kind.
    #[error("option '{key}' is a {found}, not a {expected}")]
    TypeMismatch {
        /// The requested key.
        key: String,
        /// The kind requested.
        expected: FlagKind,
        /// The kind registered.
        found: FlagKind,
    },
}

/// Resolves registered options from layered sources.
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    env_prefix: Option<String>,
    env: Option<BTreeMap<String, String>>,
    overrides: Vec<String>,
}

impl ConfigLoader {
    /// A loader that only applies defaults and the process environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a TOML file. Nested tables flatten into dotted keys.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Prefix prepended to environment variable names (`{PREFIX}_{KEY}`).
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Use a fixed set of variables instead of the process environment.
    pub fn with_env_vars<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = Some(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }

    /// Explicit `KEY=VALUE` overrides, applied last.
    pub fn with_overrides<I, S>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.overrides.extend(overrides.into_iter().map(Into::into));
        self
    }

    /// The configuration file, if any.
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// Environment variable consulted for `key`.
    pub fn env_var_name(&self, key: &str) -> String {
        let bare: String = key
            .chars()
            .map(|c| match c {
                '.' | '-' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();
        match &self.env_prefix {
            Some(prefix) if !prefix.is_empty() => format!("{}_{bare}", prefix.to_ascii_uppercase()),
            _ => bare,
        }
    }

    /// Resolve every option in `flags`.
    pub fn resolve(&self, flags: &FlagSet) -> Result<ResolvedConfig, ConfigError> {
        let mut resolved = ResolvedConfig::default();
        for def in flags.iter() {
            resolved.insert(def.key.clone(), def.default.clone(), ValueSource::Default);
        }

        if let Some(path) = &self.file {
            for (key, value) in read_file(path)? {
                let def = flags.get(&key).ok_or_else(|| ConfigError::UnknownKey {
                    key: key.clone(),
                    origin: ValueSource::File,
                })?;
                let value = from_toml(&key, def.kind(), value)?;
                resolved.insert(key, value, ValueSource::File);
            }
        }

        for def in flags.iter() {
            if let Some(raw) = self.env_value(&self.env_var_name(&def.key)) {
                let value = parse_raw(&def.key, def.kind(), &raw, ValueSource::Env)?;
                resolved.insert(def.key.clone(), value, ValueSource::Env);
            }
        }

        for entry in &self.overrides {
            let (key, raw) = entry
                .split_once('=')
                .ok_or_else(|| ConfigError::MalformedOverride(entry.clone()))?;
            let key = key.trim();
            let def = flags.get(key).ok_or_else(|| ConfigError::UnknownKey {
                key: key.to_string(),
                origin: ValueSource::Override,
            })?;
            let value = parse_raw(key, def.kind(), raw, ValueSource::Override)?;
            resolved.insert(key.to_string(), value, ValueSource::Override);
        }

        tracing::debug!(
            options = resolved.len(),
            file = ?self.file,
            overrides = self.overrides.len(),
            "Configuration resolved"
        );
        Ok(resolved)
    }

    fn env_value(&self, name: &str) -> Option<String> {
        match &self.env {
            Some(vars) => vars.get(name).cloned(),
            None => std::env::var(name).ok(),
        }
    }
}

fn read_file(path: &Path) -> Result<Vec<(String, toml::Value)>, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let table: toml::Table = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let mut entries = Vec::new();
    flatten("", table, &mut entries);
    Ok(entries)
}

fn flatten(prefix: &str, table: toml::Table, out: &mut Vec<(String, toml::Value)>) {
    for (name, value) in table {
        let key = super::flags::qualify(prefix, &name);
        match value {
            toml::Value::Table(nested) => flatten(&key, nested, out),
            value => out.push((key, value)),
        }
    }
}

fn from_toml(key: &str, kind: FlagKind, value: toml::Value) -> Result<FlagValue, ConfigError> {
    match (kind, value) {
        (FlagKind::Int, toml::Value::Integer(v)) => Ok(FlagValue::Int(v)),
        (FlagKind::Bool, toml::Value::Boolean(v)) => Ok(FlagValue::Bool(v)),
        (_, toml::Value::String(raw)) => parse_raw(key, kind, &raw, ValueSource::File),
        (kind, other) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            kind,
            raw: other.to_string(),
            origin: ValueSource::File,
        }),
    }
}

fn parse_raw(
    key: &str,
    kind: FlagKind,
    raw: &str,
    origin: ValueSource,
) -> Result<FlagValue, ConfigError> {
    FlagValue::parse(kind, raw).ok_or_else(|| ConfigError::InvalidValue {
        key: key.to_string(),
        kind,
        raw: format!("{raw:?}"),
        origin,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn flags() -> FlagSet {
        let mut set = FlagSet::new();
        let mut http = set.scoped("http", "http");
        http.int("port", 3000, "").unwrap();
        http.string("bind_address", "", "").unwrap();
        http.bool("no_default_middleware", false, "").unwrap();
        set
    }

    fn config_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_apply_without_sources() {
        let resolved = ConfigLoader::new()
            .with_env_vars(Vec::<(String, String)>::new())
            .resolve(&flags())
            .unwrap();
        assert_eq!(resolved.view("http").int("port").unwrap(), 3000);
        assert_eq!(resolved.get("http.port").unwrap().source, ValueSource::Default);
    }

    #[test]
    fn later_sources_take_precedence() {
        let file = config_file(
            "[http]\nport = 4000\nbind_address = \"10.0.0.1\"\nno_default_middleware = true\n",
        );
        let resolved = ConfigLoader::new()
            .with_file(file.path())
            .with_env_prefix("host")
            .with_env_vars([("HOST_HTTP_PORT", "5000"), ("HOST_HTTP_BIND_ADDRESS", "::1")])
            .with_overrides(["http.port=0"])
            .resolve(&flags())
            .unwrap();

        let http = resolved.view("http");
        assert_eq!(http.int("port").unwrap(), 0);
        assert_eq!(http.string("bind_address").unwrap(), "::1");
        assert!(http.bool("no_default_middleware").unwrap());
        assert_eq!(resolved.get("http.port").unwrap().source, ValueSource::Override);
        assert_eq!(resolved.get("http.bind_address").unwrap().source, ValueSource::Env);
        assert_eq!(
            resolved.get("http.no_default_middleware").unwrap().source,
            ValueSource::File
        );
    }

    #[test]
    fn unknown_file_key_is_rejected() {
        let file = config_file("[http]\nprot = 1\n");
        let err = ConfigLoader::new()
            .with_file(file.path())
            .with_env_vars(Vec::<(String, String)>::new())
            .resolve(&flags())
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKey { ref key, origin: ValueSource::File } if key == "http.prot"));
    }

    #[test]
    fn bad_values_are_rejected() {
        let err = ConfigLoader::new()
            .with_env_vars([("HTTP_PORT", "eighty")])
            .resolve(&flags())
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { kind: FlagKind::Int, origin: ValueSource::Env, .. }));

        let file = config_file("[http]\nport = 1.5\n");
        let err = ConfigLoader::new()
            .with_file(file.path())
            .with_env_vars(Vec::<(String, String)>::new())
            .resolve(&flags())
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { origin: ValueSource::File, .. }));
    }

    #[test]
    fn malformed_and_unknown_overrides_are_rejected() {
        let loader = ConfigLoader::new().with_env_vars(Vec::<(String, String)>::new());
        assert!(matches!(
            loader.clone().with_overrides(["http.port"]).resolve(&flags()),
            Err(ConfigError::MalformedOverride(_))
        ));
        assert!(matches!(
            loader.with_overrides(["nope=1"]).resolve(&flags()),
            Err(ConfigError::UnknownKey { origin: ValueSource::Override, .. })
        ));
    }

    #[test]
    fn env_names_are_upper_snake_case() {
        let loader = ConfigLoader::new().with_env_prefix("svc");
        assert_eq!(loader.env_var_name("http.bind_address"), "SVC_HTTP_BIND_ADDRESS");
        assert_eq!(ConfigLoader::new().env_var_name("my-plugin.value"), "MY_PLUGIN_VALUE");
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = ConfigLoader::new()
            .with_file("/nonexistent/service-host.toml")
            .resolve(&flags())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
