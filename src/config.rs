//! Runtime configuration
//!
//! Stored as TOML. Every section falls back to its defaults, so a partial
//! file (or none at all) yields a working setup.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::error::{ConfigError, NetworkError};
use crate::packet::Address;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub pools: PoolConfig,
    pub network: NetworkConfig,
    pub logging: LoggingConfig,
}

/// Buffer and packet pool sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Capacity of each receive buffer in bytes
    pub buffer_size: usize,
    /// Maximum number of buffers alive at once
    pub max_buffers: usize,
    /// Maximum number of packets alive at once
    pub max_packets: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_buffers: DEFAULT_MAX_BUFFERS,
            max_packets: DEFAULT_MAX_PACKETS,
        }
    }
}

/// Network loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Addresses to receive on, as `ip:port`
    pub receivers: Vec<String>,
    /// Datagrams read per readiness notification
    pub max_reads_per_wakeup: usize,
    /// Enable address reuse when binding multicast groups
    pub reuse_multicast_address: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            receivers: Vec::new(),
            max_reads_per_wakeup: DEFAULT_MAX_READS_PER_WAKEUP,
            reuse_multicast_address: true,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Per-user configuration file location
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        ProjectDirs::from("", "", "roc-netio-rx")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&text)?;
        config.validate()?;

        tracing::debug!("config: loaded {}", path.display());
        Ok(config)
    }

    /// Load a configuration file, or defaults if it does not exist
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("config: {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Write the configuration, creating parent directories as needed
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |e: std::io::Error| ConfigError::Write {
            path: path.display().to_string(),
            reason: e.to_string(),
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let text = toml::to_string_pretty(self)?;
        fs::write(path, text).map_err(write_err)
    }

    /// Check values that would make the runtime unusable
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("pools.buffer_size", self.pools.buffer_size),
            ("pools.max_buffers", self.pools.max_buffers),
            ("pools.max_packets", self.pools.max_packets),
            ("network.max_reads_per_wakeup", self.network.max_reads_per_wakeup),
        ];

        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        for receiver in &self.network.receivers {
            let address: Address = receiver.parse().map_err(|e: NetworkError| {
                ConfigError::InvalidValue {
                    field: "network.receivers",
                    reason: e.to_string(),
                }
            })?;

            if !address.valid() {
                return Err(ConfigError::InvalidValue {
                    field: "network.receivers",
                    reason: format!("{} is not a bindable address", receiver),
                });
            }
        }

        Ok(())
    }
}
