//! TOML-based configuration for dbnexus.
//!
//! Supports a config file (dbnexus.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [drivers]
//! root = "~/.dbnexus/drivers"
//! manifest_url = "builtin://manifest"
//! release_repository = "https://github.com/dbnexus/dbnexus"
//!
//! [agent]
//! call_timeout_secs = 120
//! connect_timeout_secs = 30
//! stderr_limit_bytes = 16384
//!
//! [logging]
//! level = "info"
//!
//! [connections.local]
//! type = "sqlite"
//! host = "./data/app.db"
//!
//! [connections.reporting]
//! type = "mariadb"
//! host = "db.internal"
//! port = 3306
//! user = "report"
//! password = "${REPORT_DB_PASSWORD}"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::connection::ConnectionConfig;

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

    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Saved connections, addressable by name from the CLI.
    pub connections: HashMap<String, ConnectionConfig>,

    /// Driver provisioning configuration.
    pub drivers: DriverSettings,

    /// Agent process configuration.
    pub agent: AgentSettings,

    /// Logging configuration.
    pub logging: LoggingSettings,
}

/// Driver provisioning configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DriverSettings {
    /// Driver root directory. Falls back to `DBNEXUS_DRIVER_DIR`, then the
    /// per-user default.
    pub root: Option<String>,

    /// Manifest source: http(s) URL, file path, or `builtin://manifest`.
    pub manifest_url: Option<String>,

    /// Repository whose releases publish `driver-agent` assets.
    pub release_repository: String,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            root: None,
            manifest_url: None,
            release_repository: "https://github.com/dbnexus/dbnexus".to_string(),
        }
    }
}

/// Agent process configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Deadline for a single request/response exchange.
    pub call_timeout_secs: u64,

    /// Deadline for the `connect` handshake.
    pub connect_timeout_secs: u64,

    /// Maximum bytes of worker stderr kept for error messages.
    pub stderr_limit_bytes: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            call_timeout_secs: 120,
            connect_timeout_secs: 30,
            stderr_limit_bytes: 16 * 1024,
        }
    }
}

impl AgentSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
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
        Self::from_toml(&content)
    }

    /// Parse settings from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `DBNEXUS_CONFIG`
    /// 2. `./dbnexus.toml`
    /// 3. `~/.config/dbnexus/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("DBNEXUS_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("dbnexus.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("dbnexus").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.agent.stderr_limit_bytes == 0 {
            return Err(SettingsError::InvalidConfig(
                "agent.stderr_limit_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Get a saved connection by name with `${ENV}` references expanded in
    /// its credential fields.
    pub fn connection(&self, name: &str) -> Result<ConnectionConfig, SettingsError> {
        let mut config = self
            .connections
            .get(name)
            .cloned()
            .ok_or_else(|| SettingsError::ConnectionNotFound(name.to_string()))?;

        config.password = expand_env_vars(&config.password)?;
        config.replica_password = expand_env_vars(&config.replica_password)?;
        config.ssh.password = expand_env_vars(&config.ssh.password)?;
        Ok(config)
    }

    /// Driver root requested by configuration, if any.
    ///
    /// `DBNEXUS_DRIVER_DIR` wins over the file setting.
    pub fn driver_root(&self) -> Result<Option<String>, SettingsError> {
        if let Ok(dir) = env::var("DBNEXUS_DRIVER_DIR") {
            if !dir.trim().is_empty() {
                return Ok(Some(dir));
            }
        }
        match &self.drivers.root {
            Some(root) => Ok(Some(expand_env_vars(root)?)),
            None => Ok(None),
        }
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
            while let Some(&ch) = chars.peek() {
                if ch.is_alphanumeric() || ch == '_' {
                    var_name.push(ch);
                    chars.next();
                } else {
                    break;
                }
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
