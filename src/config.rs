// ABOUTME: Service configuration: HTTP listener settings and REPL backend knobs
// Loaded from a TOML file when present, overridable from the command line

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Address the service listens on.
    pub host: String,
    /// Port the service listens on.
    pub port: u16,
    pub repl: ReplConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4648,
            repl: ReplConfig::default(),
        }
    }
}

/// Everything needed to provision and reach one REPL backend container.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplConfig {
    /// Image from which backend containers are built.
    pub image: String,
    /// Docker network shared with backend containers.
    pub network: String,
    /// Port on which each backend container serves HTTP and websockets.
    pub port: u16,
    /// Prefix for derived container names.
    pub container_prefix: String,
    /// Unprivileged user the backend runs as.
    pub container_user: String,
    /// How long to wait for a new backend to answer its health probe.
    pub ready_timeout_ms: u64,
    /// Interval between readiness polls.
    pub ready_poll_interval_ms: u64,
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            image: "cyberdojo/repl_container_python".to_string(),
            network: "cyber-dojo".to_string(),
            port: 4647,
            container_prefix: "cyber-dojo-repl-container-python".to_string(),
            container_user: "nobody".to_string(),
            ready_timeout_ms: 5_000,
            ready_poll_interval_ms: 100,
        }
    }
}

impl ReplConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_interval_ms)
    }
}

impl AppConfig {
    /// Load from the user's config directory, falling back to defaults when
    /// no file exists.
    pub fn load() -> Result<Self, ConfigError> {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(Self::default());
        };

        let path = config_dir.join("repl-box").join("config.toml");
        if path.exists() {
            debug!("loading config from {}", path.display());
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}
