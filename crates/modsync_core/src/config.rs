//! Host configuration.
//!
//! Values come from defaults, a JSON document, or `MODSYNC_*` environment
//! variables layered over either.

use crate::logging::{default_log_level, normalize_level};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_EXTENSION_DIR: &str = "MODSYNC_EXTENSION_DIR";
pub const ENV_HANDSHAKE_TIMEOUT_MS: &str = "MODSYNC_HANDSHAKE_TIMEOUT_MS";
pub const ENV_LOAD_DELAY_MS: &str = "MODSYNC_LOAD_DELAY_MS";
pub const ENV_LOG_LEVEL: &str = "MODSYNC_LOG_LEVEL";

const DEFAULT_EXTENSION_DIR: &str = "extensions";
const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_LOAD_DELAY_MS: u64 = 1_000;
const DEFAULT_ANNOUNCE_INTERVAL_MS: u64 = 333;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Malformed(String),
    InvalidNumber { key: &'static str, value: String },
    EmptyExtensionDir,
    ZeroHandshakeTimeout,
    InvalidLogLevel(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(message) => write!(f, "config is not valid JSON: {message}"),
            Self::InvalidNumber { key, value } => {
                write!(f, "{key} must be a non-negative integer, got `{value}`")
            }
            Self::EmptyExtensionDir => write!(f, "extension_dir must not be empty"),
            Self::ZeroHandshakeTimeout => write!(f, "handshake_timeout_ms must be positive"),
            Self::InvalidLogLevel(message) => write!(f, "log_level: {message}"),
        }
    }
}

impl Error for ConfigError {}

/// Runtime settings of one extension host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Directory scanned for `*.extension.json` packages.
    pub extension_dir: PathBuf,
    /// Window for a peer to acknowledge one handshake.
    pub handshake_timeout_ms: u64,
    /// Delay between startup and the deferred extension load.
    pub load_delay_ms: u64,
    /// Stagger between per-extension "loaded" notices.
    pub announce_interval_ms: u64,
    pub log_level: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            extension_dir: PathBuf::from(DEFAULT_EXTENSION_DIR),
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            load_delay_ms: DEFAULT_LOAD_DELAY_MS,
            announce_interval_ms: DEFAULT_ANNOUNCE_INTERVAL_MS,
            log_level: default_log_level().to_string(),
        }
    }
}

impl HostConfig {
    /// Parses JSON; missing fields keep their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|err| ConfigError::Malformed(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies `MODSYNC_*` overrides read through `lookup`.
    ///
    /// Blank values are ignored.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(dir) = read(ENV_EXTENSION_DIR) {
            self.extension_dir = PathBuf::from(dir);
        }
        if let Some(value) = read(ENV_HANDSHAKE_TIMEOUT_MS) {
            self.handshake_timeout_ms = parse_millis(ENV_HANDSHAKE_TIMEOUT_MS, value)?;
        }
        if let Some(value) = read(ENV_LOAD_DELAY_MS) {
            self.load_delay_ms = parse_millis(ENV_LOAD_DELAY_MS, value)?;
        }
        if let Some(level) = read(ENV_LOG_LEVEL) {
            self.log_level = level;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.extension_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyExtensionDir);
        }
        if self.handshake_timeout_ms == 0 {
            return Err(ConfigError::ZeroHandshakeTimeout);
        }
        normalize_level(&self.log_level).map_err(ConfigError::InvalidLogLevel)?;
        Ok(())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn load_delay(&self) -> Duration {
        Duration::from_millis(self.load_delay_ms)
    }

    pub fn announce_interval(&self) -> Duration {
        Duration::from_millis(self.announce_interval_ms)
    }
}

fn parse_millis(key: &'static str, value: String) -> Result<u64, ConfigError> {
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidNumber { key, value })
}
