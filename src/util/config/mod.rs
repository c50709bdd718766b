//! Runtime configuration
//!
//! Settings for the event bridge, default graph options and logging, read
//! from a TOML file.
//!
//! # Lookup
//!
//! ```text
//! Priority (high → low):
//! 1. YAOXIANG_LOG (log level only)
//! 2. File named by YAOXIANG_FLOW_CONFIG
//! 3. ./yaoxiang-flow.toml
//! 4. Default values
//! ```
//!
//! # Example file
//!
//! ```toml
//! [bridge]
//! capacity = 1024
//! poll_interval_ms = 100
//!
//! [graph]
//! timeout_ms = 30000
//! retries = 0
//!
//! [log]
//! level = "info"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::runtime::bridge::{BridgeConfig, DEFAULT_CAPACITY, DEFAULT_POLL_INTERVAL};
use crate::runtime::dag::GraphOptions;
use crate::util::logger::LogLevel;

/// Default configuration file name
pub const CONFIG_FILE: &str = "yaoxiang-flow.toml";

/// Environment variable naming an alternative configuration file
pub const CONFIG_ENV: &str = "YAOXIANG_FLOW_CONFIG";

/// Environment variable overriding the log level
pub const LOG_ENV: &str = "YAOXIANG_LOG";

/// Top-level runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    /// Event bridge settings
    #[serde(default)]
    pub bridge: BridgeSection,
    /// Defaults for graphs created without explicit options
    #[serde(default)]
    pub graph: GraphSection,
    /// Logging settings
    #[serde(default)]
    pub log: LogSection,
}

/// `[bridge]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeSection {
    /// Buffered entries before new ones are dropped
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Wait between checks for exhausted sources
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// `[graph]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GraphSection {
    /// Per-node timeout; absent means no timeout
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Extra attempts for nodes whose work raised an error
    #[serde(default)]
    pub retries: u32,
}

/// `[log]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSection {
    /// One of debug, info, warn, error
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

impl RuntimeConfig {
    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            capacity: self.bridge.capacity,
            poll_interval: Duration::from_millis(self.bridge.poll_interval_ms),
        }
    }

    pub fn graph_options(&self) -> GraphOptions {
        GraphOptions {
            timeout: self.graph.timeout_ms.map(Duration::from_millis),
            retries: self.graph.retries,
        }
    }

    /// Effective log level: `YAOXIANG_LOG`, then `[log] level`
    pub fn log_level(&self) -> LogLevel {
        resolve_level(&self.log.level, std::env::var(LOG_ENV).ok().as_deref())
    }
}

/// Pick the override if it parses, else the configured level, else info.
pub(crate) fn resolve_level(
    configured: &str,
    env_override: Option<&str>,
) -> LogLevel {
    env_override
        .and_then(|level| level.parse().ok())
        .or_else(|| configured.parse().ok())
        .unwrap_or(LogLevel::Info)
}

/// Path of the configuration file to use
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE))
}

/// Load configuration from the default location.
/// Returns defaults if the file doesn't exist.
pub fn load_config() -> Result<RuntimeConfig, ConfigError> {
    load_from(&config_path())
}

/// Load configuration from `path`; a missing file yields defaults
pub fn load_from(path: &Path) -> Result<RuntimeConfig, ConfigError> {
    if !path.exists() {
        return Ok(RuntimeConfig::default());
    }
    let content = fs::read_to_string(path)?;
    RuntimeConfig::from_toml(&content)
}

/// Write configuration to `path`, creating parent directories
pub fn save_to(
    config: &RuntimeConfig,
    path: &Path,
) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    fs::write(path, config.to_toml()?)?;
    Ok(())
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    SerializeError(#[from] toml::ser::Error),
}
