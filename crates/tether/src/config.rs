//! Configuration file loading.
//!
//! The CLI reads a single TOML file:
//!
//! ```toml
//! [manager]
//! max_reconnect_attempts = 5
//! reconnect_base_delay_ms = 1000
//!
//! [[servers]]
//! id = "sqlite"
//! name = "SQLite"
//! timeout_ms = 10000
//! tags = ["local"]
//!
//! [servers.transport]
//! type = "stdio"
//! command = "mcp-server-sqlite"
//! args = ["--db", "/tmp/test.db"]
//! ```
//!
//! Default location is `$XDG_CONFIG_HOME/tether/config.toml`, overridden by
//! `TETHER_CONFIG_DIR` or `--config`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_mcp::{ManagerConfig, ServerConfig};

/// Application name used for the config directory.
pub const APP_NAME: &str = "tether";

/// Config file name inside the config directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Environment variable overriding the config directory.
pub const CONFIG_DIR_ENV: &str = "TETHER_CONFIG_DIR";

/// Result type alias for config operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read a config file.
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Two servers share an id.
    #[error("duplicate server id '{id}'")]
    DuplicateServer { id: String },

    /// A server entry failed validation.
    #[error("invalid server entry: {0}")]
    InvalidServer(String),

    /// Referenced server is not configured.
    #[error("server '{0}' is not configured")]
    UnknownServer(String),
}

/// The `[manager]` table. Unset keys keep library defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManagerSection {
    pub max_reconnect_attempts: Option<u32>,
    pub reconnect_base_delay_ms: Option<u64>,
    pub auto_reconnect: Option<bool>,
    pub event_capacity: Option<usize>,
}

impl ManagerSection {
    /// Build a [`ManagerConfig`] that identifies as this CLI.
    pub fn to_manager_config(&self) -> ManagerConfig {
        let mut config =
            ManagerConfig::new().with_client_info(APP_NAME, env!("CARGO_PKG_VERSION"));
        if let Some(max) = self.max_reconnect_attempts {
            config = config.with_max_reconnect_attempts(max);
        }
        if let Some(ms) = self.reconnect_base_delay_ms {
            config = config.with_reconnect_base_delay(Duration::from_millis(ms));
        }
        if let Some(enabled) = self.auto_reconnect {
            config = config.with_auto_reconnect(enabled);
        }
        if let Some(capacity) = self.event_capacity {
            config = config.with_event_capacity(capacity);
        }
        config
    }
}

/// Parsed contents of the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TetherConfig {
    #[serde(default)]
    pub manager: ManagerSection,
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

impl TetherConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: TetherConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for server in &self.servers {
            server
                .validate()
                .map_err(|e| ConfigError::InvalidServer(e.to_string()))?;
            if !seen.insert(server.id.as_str()) {
                return Err(ConfigError::DuplicateServer {
                    id: server.id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Look up a server by id.
    pub fn server(&self, id: &str) -> Result<&ServerConfig> {
        self.servers
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| ConfigError::UnknownServer(id.to_string()))
    }
}

/// A config together with the file it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: TetherConfig,
    /// `None` when no file existed at the default location.
    pub path: Option<PathBuf>,
}

/// Directory holding tether's config and logs.
///
/// `TETHER_CONFIG_DIR` wins over the platform default.
pub fn xdg_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Default config file path.
pub fn default_config_path() -> Option<PathBuf> {
    xdg_config_dir().map(|d| d.join(CONFIG_FILE))
}

/// Load a config file.
///
/// An explicit path must exist. A missing file at the default location
/// yields an empty config.
pub fn load_config(path: Option<&Path>) -> Result<LoadedConfig> {
    match path {
        Some(path) => Ok(LoadedConfig {
            config: load_config_file(path)?,
            path: Some(path.to_path_buf()),
        }),
        None => match default_config_path() {
            Some(path) if path.is_file() => Ok(LoadedConfig {
                config: load_config_file(&path)?,
                path: Some(path),
            }),
            _ => {
                tracing::debug!("no config file found, using an empty configuration");
                Ok(LoadedConfig {
                    config: TetherConfig::default(),
                    path: None,
                })
            }
        },
    }
}

/// Load configuration from a specific file.
pub fn load_config_file(path: &Path) -> Result<TetherConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    let config = TetherConfig::from_toml(&contents)?;
    tracing::debug!(path = %path.display(), servers = config.servers.len(), "loaded config");
    Ok(config)
}
