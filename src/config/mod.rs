//! Configuration management for helper-dispatch
//!
//! Settings come from three layers, later ones winning:
//! built-in defaults, an optional TOML file, then `DISPATCH_*` environment
//! variables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::dispatch::EscalationConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Assignment and escalation settings
    pub dispatch: DispatchConfig,

    /// Store backend
    pub storage: StorageConfig,

    /// HTTP server
    pub server: ServerSettings,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Assignment and escalation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Seconds an assignee has before escalation moves on
    pub escalation_timeout_secs: u64,

    /// Consecutive store failures an escalation chain tolerates
    pub max_store_retries: u32,

    /// Buffered booking events per subscriber
    pub event_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            escalation_timeout_secs: 30,
            max_store_retries: 3,
            event_capacity: 256,
        }
    }
}

/// Which store backend to open
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sqlite => "sqlite",
            Self::Memory => "memory",
        })
    }
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => anyhow::bail!("unknown storage backend '{other}' (expected sqlite or memory)"),
        }
    }
}

/// Store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    /// SQLite database path
    pub sqlite_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            sqlite_path: PathBuf::from("data/dispatch.db"),
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
    pub request_logging: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            enable_cors: true,
            request_logging: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Config {
    /// Defaults overlaid with environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// File (if given) overlaid with environment variables, then validated
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `DISPATCH_*` overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: FromStr>(key: &str, value: String) -> Result<T>
        where
            T::Err: fmt::Display,
        {
            value
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid value for {key}: {e}"))
        }

        if let Some(v) = lookup("DISPATCH_ESCALATION_TIMEOUT_SECS") {
            self.dispatch.escalation_timeout_secs = parse("DISPATCH_ESCALATION_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = lookup("DISPATCH_MAX_STORE_RETRIES") {
            self.dispatch.max_store_retries = parse("DISPATCH_MAX_STORE_RETRIES", v)?;
        }
        if let Some(v) = lookup("DISPATCH_EVENT_CAPACITY") {
            self.dispatch.event_capacity = parse("DISPATCH_EVENT_CAPACITY", v)?;
        }
        if let Some(v) = lookup("DISPATCH_STORAGE_BACKEND") {
            self.storage.backend = v.parse()?;
        }
        if let Some(v) = lookup("DISPATCH_SQLITE_PATH") {
            self.storage.sqlite_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("DISPATCH_HOST") {
            self.server.host = v;
        }
        if let Some(v) = lookup("DISPATCH_PORT") {
            self.server.port = parse("DISPATCH_PORT", v)?;
        }
        if let Some(v) = lookup("DISPATCH_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("DISPATCH_LOG_FORMAT") {
            self.logging.format = v;
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.dispatch.escalation_timeout_secs == 0 {
            anyhow::bail!("escalation_timeout_secs must be greater than 0");
        }

        if self.dispatch.event_capacity == 0 {
            anyhow::bail!("event_capacity must be greater than 0");
        }

        if self.storage.backend == StorageBackend::Sqlite
            && self.storage.sqlite_path.as_os_str().is_empty()
        {
            anyhow::bail!("sqlite_path is required for the sqlite backend");
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("log format must be 'text' or 'json', got '{}'", self.logging.format);
        }

        Ok(())
    }

    /// Get escalation timeout as Duration
    #[must_use]
    pub fn escalation_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch.escalation_timeout_secs)
    }

    #[must_use]
    pub fn escalation(&self) -> EscalationConfig {
        EscalationConfig {
            timeout: self.escalation_timeout(),
            max_store_retries: self.dispatch.max_store_retries,
        }
    }
}
