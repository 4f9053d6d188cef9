//! Configuration loading.
//!
//! Settings come from a TOML file (`qsmon.toml` by default) and can be
//! overridden by environment variables. A missing file yields the
//! defaults; a malformed one is an error.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default config file name.
pub const DEFAULT_CONFIG_FILE: &str = "qsmon.toml";

/// Environment variable names.
pub mod env_vars {
    pub const DEVICE_SERIAL: &str = "QSMON_DEVICE_SERIAL";
    pub const ADB_PATH: &str = "QSMON_ADB_PATH";
    pub const TIMEOUT_SECS: &str = "QSMON_TIMEOUT_SECS";
    pub const MAX_RETRIES: &str = "QSMON_MAX_RETRIES";
    pub const MAX_CONCURRENT: &str = "QSMON_MAX_CONCURRENT";
    pub const LOG_LEVEL: &str = "QSMON_LOG_LEVEL";
    pub const LOG_JSON: &str = "QSMON_LOG_JSON";
}

/// Default values.
pub mod defaults {
    pub const ADB_PATH: &str = "adb";
    pub const TIMEOUT_SECS: u64 = 30;
    pub const MAX_RETRIES: u32 = 0;
    pub const MAX_CONCURRENT: usize = 4;
    pub const BASE_DELAY_MS: u64 = 1000;
    pub const MAX_DELAY_MS: u64 = 60_000;
    pub const BACKOFF_FACTOR: f64 = 2.0;
    pub const POLL_INTERVAL_MS: u64 = 1000;
    pub const MONITOR_INTERVAL_SECS: u64 = 5;
    pub const LOG_LEVEL: &str = "info";
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value '{value}' for {var}")]
    InvalidEnv { var: String, value: String },
}

/// Delay growth between retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryStrategy {
    Fixed,
    Linear,
    #[default]
    Exponential,
}

impl std::str::FromStr for RetryStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(RetryStrategy::Fixed),
            "linear" => Ok(RetryStrategy::Linear),
            "exponential" => Ok(RetryStrategy::Exponential),
            other => Err(format!("unknown retry strategy: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Target device serial; `None` lets adb pick the only attached device.
    pub serial: Option<String>,
    pub adb_path: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            serial: None,
            adb_path: defaults::ADB_PATH.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-attempt timeout; 0 disables the watchdog.
    pub default_timeout_secs: u64,
    pub max_retries: u32,
    pub max_concurrent: usize,
    pub retry_strategy: RetryStrategy,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    pub poll_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: defaults::TIMEOUT_SECS,
            max_retries: defaults::MAX_RETRIES,
            max_concurrent: defaults::MAX_CONCURRENT,
            retry_strategy: RetryStrategy::default(),
            base_delay_ms: defaults::BASE_DELAY_MS,
            max_delay_ms: defaults::MAX_DELAY_MS,
            backoff_factor: defaults::BACKOFF_FACTOR,
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_secs: u64,
    /// Enabled feature names; empty means all built-in features.
    pub features: Vec<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: defaults::MONITOR_INTERVAL_SECS,
            features: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json: false,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub device: DeviceConfig,
    pub engine: EngineConfig,
    pub monitor: MonitorConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content, path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Load from `path` (or [`DEFAULT_CONFIG_FILE`]) and apply env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(serial) = lookup(env_vars::DEVICE_SERIAL) {
            self.device.serial = Some(serial);
        }
        if let Some(path) = lookup(env_vars::ADB_PATH) {
            self.device.adb_path = path;
        }
        if let Some(v) = parse_env(&lookup, env_vars::TIMEOUT_SECS)? {
            self.engine.default_timeout_secs = v;
        }
        if let Some(v) = parse_env(&lookup, env_vars::MAX_RETRIES)? {
            self.engine.max_retries = v;
        }
        if let Some(v) = parse_env(&lookup, env_vars::MAX_CONCURRENT)? {
            self.engine.max_concurrent = v;
        }
        if let Some(level) = lookup(env_vars::LOG_LEVEL) {
            self.logging.level = level;
        }
        if let Some(v) = parse_env(&lookup, env_vars::LOG_JSON)? {
            self.logging.json = v;
        }
        Ok(())
    }
}

fn parse_env<F, T>(lookup: &F, var: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                var: var.to_string(),
                value,
            }),
    }
}
