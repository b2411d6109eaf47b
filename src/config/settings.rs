//! TOML-based configuration for chmux.
//!
//! Supports a config file (chmux.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [server]
//! url = "http://analytics.internal:8123"
//! user = "reporting"
//! password = "${CHMUX_PASSWORD}"
//! database = "events"
//! timeout_secs = 60
//!
//! [multiplexer]
//! select_timeout_ms = 100
//! drain_budget_ms = 50
//! idle_sleep_ms = 2
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Database server endpoint.
    pub server: ServerSettings,

    /// Polling behaviour of the slot multiplexer.
    pub multiplexer: MultiplexerSettings,
}

/// Database server endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Base URL of the HTTP interface.
    pub url: String,

    /// User name sent with every request.
    pub user: String,

    /// Password (supports ${ENV_VAR} expansion).
    pub password: String,

    /// Database used when a request does not name one.
    pub database: Option<String>,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:8123".to_string(),
            user: "default".to_string(),
            password: String::new(),
            database: None,
            timeout_secs: 30,
        }
    }
}

impl ServerSettings {
    /// Get the password with environment variables expanded.
    pub fn resolved_password(&self) -> Result<String, SettingsError> {
        expand_env_vars(&self.password)
    }

    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Multiplexer polling settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MultiplexerSettings {
    /// Upper bound for one wait on transport readiness.
    pub select_timeout_ms: u64,

    /// Time budget for draining completions in one polling cycle.
    pub drain_budget_ms: u64,

    /// Sleep used when the transport has no readiness primitive.
    pub idle_sleep_ms: u64,
}

impl Default for MultiplexerSettings {
    fn default() -> Self {
        Self {
            select_timeout_ms: 100,
            drain_budget_ms: 50,
            idle_sleep_ms: 2,
        }
    }
}

impl MultiplexerSettings {
    pub fn select_timeout(&self) -> Duration {
        Duration::from_millis(self.select_timeout_ms)
    }

    pub fn drain_budget(&self) -> Duration {
        Duration::from_millis(self.drain_budget_ms)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `CHMUX_CONFIG`
    /// 2. `./chmux.toml`
    /// 3. `~/.config/chmux/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("CHMUX_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("chmux.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("chmux").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    /// Reject settings the transport or multiplexer cannot work with.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let url = self.server.url.as_str();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(SettingsError::InvalidConfig(format!(
                "server.url must be an http(s) URL, got '{}'",
                url
            )));
        }
        if self.multiplexer.select_timeout_ms == 0 {
            return Err(SettingsError::InvalidConfig(
                "multiplexer.select_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let mut var_name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next();
            for ch in chars.by_ref() {
                if ch == '}' {
                    break;
                }
                var_name.push(ch);
            }
        } else {
            while let Some(ch) = chars.next_if(|ch| ch.is_alphanumeric() || *ch == '_') {
                var_name.push(ch);
            }
            if var_name.is_empty() {
                // Just a lone $, keep it
                result.push('$');
                continue;
            }
        }

        let value =
            env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
        result.push_str(&value);
    }

    Ok(result)
}
