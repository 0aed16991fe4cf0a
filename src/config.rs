//! Service configuration file

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use ab_bench_core::{SessionStoreConfig, SupervisorConfig};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// HTTP server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
        }
    }
}

/// Top-level configuration, loaded from TOML
///
/// ```toml
/// [server]
/// bind = "0.0.0.0:3000"
///
/// [supervisor]
/// ab_path = "/usr/bin/ab"
/// heartbeat_secs = 5
///
/// [sessions]
/// log_capacity = 1000
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// `[server]`
    pub server: ServerConfig,
    /// `[supervisor]`
    pub supervisor: SupervisorConfig,
    /// `[sessions]`
    pub sessions: SessionStoreConfig,
}

impl AppConfig {
    /// Load from a file, or defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&text)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Override the listen address
    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.server.bind = bind;
        self
    }

    /// Override the `ab` executable
    pub fn with_ab_path(mut self, path: PathBuf) -> Self {
        self.supervisor = self.supervisor.with_ab_path(path);
        self
    }
}
