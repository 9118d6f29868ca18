//! Configuration management for kdb.
//!
//! Loads configuration from ${KDB_HOME}/config.toml with sensible defaults.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::rate_limit::RateLimitConfig;

/// Default config template with comments, embedded at compile time.
const DEFAULT_CONFIG_TEMPLATE: &str = include_str!("default_config.toml");

pub mod paths {
    //! Path resolution for kdb configuration and data directories.
    //!
    //! KDB_HOME resolution order:
    //! 1. KDB_HOME environment variable (if set)
    //! 2. ~/.config/kdb (default)
    //! 3. ./.kdb when no home directory can be determined

    use std::path::PathBuf;

    /// Returns the kdb home directory.
    pub fn kdb_home() -> PathBuf {
        if let Ok(home) = std::env::var("KDB_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir()
            .map(|h| h.join(".config").join("kdb"))
            .unwrap_or_else(|| PathBuf::from(".kdb"))
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        kdb_home().join("config.toml")
    }

    /// Returns the path to the key-value store used for rate-limit bookkeeping.
    pub fn storage_path() -> PathBuf {
        kdb_home().join("storage.json")
    }

    /// Returns the directory holding rolling log files.
    pub fn logs_dir() -> PathBuf {
        kdb_home().join("logs")
    }
}

/// Rate limit settings as written in config.toml.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Seconds between two AI requests
    pub cooldown_secs: u64,
    /// AI requests allowed per calendar day
    pub daily_limit: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        let defaults = RateLimitConfig::default();
        Self {
            cooldown_secs: defaults.cooldown.as_secs(),
            daily_limit: defaults.daily_limit,
        }
    }
}

impl RateLimitSettings {
    pub fn to_gate_config(self) -> RateLimitConfig {
        RateLimitConfig {
            cooldown: Duration::from_secs(self.cooldown_secs),
            daily_limit: self.daily_limit,
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the course assistant backend
    pub backend_url: String,

    /// Gemini API key forwarded with chat requests
    pub api_key: Option<String>,

    /// Level for the file log
    pub log_level: String,

    pub rate_limit: RateLimitSettings,
}

impl Config {
    const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";
    const DEFAULT_LOG_LEVEL: &str = "warn";

    /// Loads configuration from the default config path.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Returns the configured API key. Blank strings are treated as unset.
    pub fn effective_api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Creates a default config file at the given path.
    /// Returns an error if the file already exists.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }

        Self::write_config(path, DEFAULT_CONFIG_TEMPLATE)
    }

    fn write_config(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write config to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: Self::DEFAULT_BACKEND_URL.to_string(),
            api_key: None,
            log_level: Self::DEFAULT_LOG_LEVEL.to_string(),
            rate_limit: RateLimitSettings::default(),
        }
    }
}
