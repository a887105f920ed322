//! Host configuration with file persistence

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

/// Palisade host configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    pub plugins: PluginsConfig,
    pub bridge: BridgeConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Directory the external installer places plugin packages into
    pub directory: PathBuf,
    /// Discovery config file (module -> requested version)
    pub config_file: PathBuf,
    /// Remote package registry base URL
    pub registry_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file
    pub database_path: PathBuf,
}

impl Default for HostConfig {
    fn default() -> Self {
        let dir = Self::config_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            plugins: PluginsConfig {
                directory: dir.join("plugins"),
                config_file: dir.join("plugins.json"),
                registry_url: "https://unpkg.com".to_string(),
            },
            bridge: BridgeConfig {
                request_timeout_secs: 30,
            },
            storage: StorageConfig {
                database_path: dir.join("palisade.db"),
            },
        }
    }
}

impl HostConfig {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("PALISADE_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("palisade")
        } else {
            anyhow::bail!("unable to determine a configuration directory");
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk, or defaults when no file exists yet
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }

        let data = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {:?}", path))?;
        toml::from_str(&data).with_context(|| format!("failed to parse config file: {:?}", path))
    }

    /// Persist configuration to disk
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config directory: {:?}", parent))?;
        }

        let data = toml::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(&path, data).with_context(|| format!("failed to write config file: {:?}", path))
    }

    /// Per-request bridge timeout as a `Duration`
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.bridge.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_reasonable() {
        let config = HostConfig::default();
        assert_eq!(config.bridge.request_timeout_secs, 30);
        assert_eq!(config.plugins.registry_url, "https://unpkg.com");
        assert!(config.plugins.config_file.ends_with("plugins.json"));
    }

    #[test]
    fn round_trips_through_toml() {
        let config = HostConfig::default();
        let data = toml::to_string_pretty(&config).unwrap();
        let parsed: HostConfig = toml::from_str(&data).unwrap();
        assert_eq!(parsed.plugins.registry_url, config.plugins.registry_url);
        assert_eq!(
            parsed.bridge.request_timeout_secs,
            config.bridge.request_timeout_secs
        );
    }
}
