//! Backend configuration, keyed by pool name.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::time::Duration;

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 50;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 100;
pub const DEFAULT_MAX_IDLE: usize = 3;
pub const DEFAULT_IDLE_TIMEOUT_SEC: u64 = 240;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML configuration")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid JSON configuration")]
    Json(#[from] serde_json::Error),
}

/// Settings for one logical pool, as written in configuration.
///
/// Zero means "unset" for every numeric field; defaults are filled in by
/// [BackendConfig::resolve].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Candidate servers, as "host:port".
    #[serde(alias = "proxy_list")]
    pub hosts: Vec<String>,

    #[serde(alias = "conn_timeout")]
    pub connect_timeout_ms: u64,

    #[serde(alias = "read_timeout")]
    pub read_timeout_ms: u64,

    #[serde(alias = "write_timeout")]
    pub write_timeout_ms: u64,

    pub max_idle: usize,

    pub idle_timeout_sec: u64,

    /// Sent with AUTH on every new connection. Empty means none.
    pub password: Option<String>,

    /// Sent with SELECT on every new connection. Zero means none.
    #[serde(alias = "db")]
    pub db_index: i64,
}

fn or_default<T: Default + PartialEq>(value: T, default: T) -> T {
    if value == T::default() {
        default
    } else {
        value
    }
}

impl BackendConfig {
    /// Produces the settings for a pool connected to `host`, with defaults
    /// applied to anything left unset.
    ///
    /// The configuration itself is left untouched.
    pub fn resolve(&self, host: &str) -> Settings {
        Settings {
            host: host.to_string(),
            connect_timeout: Duration::from_millis(or_default(
                self.connect_timeout_ms,
                DEFAULT_CONNECT_TIMEOUT_MS,
            )),
            read_timeout: Duration::from_millis(or_default(
                self.read_timeout_ms,
                DEFAULT_READ_TIMEOUT_MS,
            )),
            write_timeout: Duration::from_millis(or_default(
                self.write_timeout_ms,
                DEFAULT_WRITE_TIMEOUT_MS,
            )),
            max_idle: or_default(self.max_idle, DEFAULT_MAX_IDLE),
            idle_timeout: Duration::from_secs(or_default(
                self.idle_timeout_sec,
                DEFAULT_IDLE_TIMEOUT_SEC,
            )),
            password: self.password.clone().filter(|password| !password.is_empty()),
            db_index: self.db_index,
        }
    }
}

/// The fully resolved settings a pool was built with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub host: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub max_idle: usize,
    pub idle_timeout: Duration,
    pub password: Option<String>,
    pub db_index: i64,
}

// On-disk layout: every pool lives under a "list" table.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    list: BTreeMap<String, BackendConfig>,
}

/// Maps pool names to their [BackendConfig].
///
/// Populated once at startup, then shared read-only.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigRegistry {
    backends: BTreeMap<String, BackendConfig>,
}

impl ConfigRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a TOML document with pools under `[list.<name>]`.
    pub fn from_toml_str(s: &str) -> Result<Self, Error> {
        let file: ConfigFile = toml::from_str(s)?;
        Ok(file.list.into_iter().collect())
    }

    /// Parses a JSON document shaped like `{"list": {"<name>": {...}}}`.
    pub fn from_json_str(s: &str) -> Result<Self, Error> {
        let file: ConfigFile = serde_json::from_str(s)?;
        Ok(file.list.into_iter().collect())
    }

    /// Reads a configuration file. Files ending in `.json` are parsed as
    /// JSON, anything else as TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&contents)
        } else {
            Self::from_toml_str(&contents)
        }
    }

    /// Adds or replaces the configuration for `name`, returning the
    /// previous one.
    pub fn insert(&mut self, name: impl Into<String>, config: BackendConfig) -> Option<BackendConfig> {
        self.backends.insert(name.into(), config)
    }

    pub fn get(&self, name: &str) -> Option<&BackendConfig> {
        self.backends.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.backends.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

// When the same name appears more than once, the last entry wins.
impl<S: Into<String>> FromIterator<(S, BackendConfig)> for ConfigRegistry {
    fn from_iter<I: IntoIterator<Item = (S, BackendConfig)>>(iter: I) -> Self {
        let mut registry = Self::new();
        registry.extend(iter);
        registry
    }
}

impl<S: Into<String>> Extend<(S, BackendConfig)> for ConfigRegistry {
    fn extend<I: IntoIterator<Item = (S, BackendConfig)>>(&mut self, iter: I) {
        for (name, config) in iter {
            self.insert(name, config);
        }
    }
}
