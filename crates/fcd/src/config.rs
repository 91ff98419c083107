//! Configuration file support for fcd
//!
//! Loads and validates daemon settings from a TOML file. Every field has a
//! default, so a missing file or a partial file is fine. Command line flags
//! override whatever the file sets.
//! Default location: /etc/sonic/fcd.conf

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{FcdError, FcdResult};
use crate::executor::{DEFAULT_REMOTE_SHELL, DEFAULT_SHELL_PORT, DEFAULT_SHELL_WORKDIR};

/// Default config file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sonic/fcd.conf";

/// Poll loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonSection {
    /// Interval between reconciliation passes in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Delay before the first hardware readiness probe in milliseconds
    #[serde(default)]
    pub slow_start_ms: u64,

    /// Log commands instead of running them
    #[serde(default)]
    pub dry_run: bool,

    /// Program `ports = *` as one all-devports command
    #[serde(default = "default_true")]
    pub all_ports: bool,
}

/// Database configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Redis host
    #[serde(default = "default_redis_host")]
    pub redis_host: String,

    /// Redis port
    #[serde(default = "default_redis_port")]
    pub redis_port: u16,

    /// Redis database number for CONFIG_DB
    #[serde(default = "default_config_db")]
    pub config_db: i64,

    /// Redis database number for ASIC_DB
    #[serde(default = "default_asic_db")]
    pub asic_db: i64,
}

/// SDK remote shell configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShellConfig {
    #[serde(default = "default_remote_shell")]
    pub remote_shell: String,

    #[serde(default = "default_workdir")]
    pub workdir: String,

    #[serde(default = "default_shell_port")]
    pub port: u16,
}

/// Complete fcd configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub daemon: DaemonSection,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub shell: ShellConfig,
}

fn default_poll_interval() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_config_db() -> i64 {
    4
}

fn default_asic_db() -> i64 {
    1
}

fn default_remote_shell() -> String {
    DEFAULT_REMOTE_SHELL.to_string()
}

fn default_workdir() -> String {
    DEFAULT_SHELL_WORKDIR.to_string()
}

fn default_shell_port() -> u16 {
    DEFAULT_SHELL_PORT
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            slow_start_ms: 0,
            dry_run: false,
            all_ports: default_true(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            redis_host: default_redis_host(),
            redis_port: default_redis_port(),
            config_db: default_config_db(),
            asic_db: default_asic_db(),
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            remote_shell: default_remote_shell(),
            workdir: default_workdir(),
            port: default_shell_port(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> FcdResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                FcdError::Config(format!(
                    "Failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Config file {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(FcdError::Io(e)),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.daemon.poll_interval_ms)
    }

    pub fn slow_start(&self) -> Duration {
        Duration::from_millis(self.daemon.slow_start_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> FcdResult<()> {
        if self.daemon.poll_interval_ms == 0 {
            return Err(FcdError::Config("poll_interval_ms must be > 0".to_string()));
        }

        if self.database.redis_port == 0 {
            return Err(FcdError::Config("redis_port must be > 0".to_string()));
        }

        if self.shell.remote_shell.is_empty() {
            return Err(FcdError::Config("remote_shell must not be empty".to_string()));
        }

        Ok(())
    }
}
