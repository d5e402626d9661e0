//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/opscopilot/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/opscopilot/` (~/.config/opscopilot/)
//! - Data: `$XDG_DATA_HOME/opscopilot/` (~/.local/share/opscopilot/)
//! - State/Logs: `$XDG_STATE_HOME/opscopilot/` (~/.local/state/opscopilot/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// AI summarization configuration
    #[serde(default)]
    pub ai: AiConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// AI summarization configuration.
///
/// Provider fields here sit below the persisted settings row and above
/// environment variables; see [`crate::settings`].
#[derive(Debug, Deserialize, Clone)]
pub struct AiConfig {
    /// Backend used when a request does not name one
    pub default_provider: Option<String>,

    /// Lifetime of cached ticket summaries in milliseconds
    pub cache_ttl_ms: Option<u64>,

    /// Wall-clock bound on one summary stream
    #[serde(default = "default_stream_timeout")]
    pub stream_timeout_secs: u64,

    /// How long resolved provider settings are reused before reloading
    #[serde(default = "default_settings_ttl")]
    pub settings_ttl_secs: u64,

    #[serde(default)]
    pub openai: BackendConfig,

    #[serde(default)]
    pub anthropic: BackendConfig,

    #[serde(default)]
    pub gemini: BackendConfig,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            default_provider: None,
            cache_ttl_ms: None,
            stream_timeout_secs: default_stream_timeout(),
            settings_ttl_secs: default_settings_ttl(),
            openai: BackendConfig::default(),
            anthropic: BackendConfig::default(),
            gemini: BackendConfig::default(),
        }
    }
}

impl AiConfig {
    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout_secs.max(1))
    }

    pub fn settings_ttl(&self) -> Duration {
        Duration::from_secs(self.settings_ttl_secs)
    }
}

fn default_stream_timeout() -> u64 {
    30
}

fn default_settings_ttl() -> u64 {
    300
}

/// Per-backend overrides
#[derive(Debug, Deserialize, Default, Clone)]
pub struct BackendConfig {
    /// API key (can also use env var)
    pub api_key: Option<String>,
    /// Model to use
    pub model: Option<String>,
    /// API endpoint (optional, uses default for provider)
    pub endpoint: Option<String>,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Bearer token required on `/api` routes when set
    pub auth_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            auth_token: None,
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,

    /// Also write compact logs to stderr
    #[serde(default)]
    pub stderr: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
            stderr: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/opscopilot/config.toml` (~/.config/opscopilot/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("opscopilot").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("opscopilot")
    }

    /// Returns the state directory path (for logs)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("opscopilot")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/opscopilot/data.db` (~/.local/share/opscopilot/data.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("data.db")
    }
}
