//! Configuration for the naming service

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default config file, overridable with `MINIDFS_CONFIG`
pub const DEFAULT_CONFIG_FILE: &str = "minidfs.toml";

/// Global configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Naming service config
    pub coordinator: CoordinatorConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from `minidfs.toml` (or `MINIDFS_CONFIG`) and `MINIDFS__*` env vars.
    ///
    /// A missing file is fine and leaves the defaults in place. A file that
    /// exists but does not parse is an error.
    pub fn load() -> crate::Result<Self> {
        let path =
            std::env::var("MINIDFS_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> crate::Result<Self> {
        let mut cfg = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("MINIDFS")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize::<Config>())
            .map_err(|e| crate::Error::InvalidConfig(format!("{}: {}", path, e)))?;

        if cfg.log_level.is_empty() {
            cfg.log_level = default_log_level();
        }
        Ok(cfg)
    }
}

/// Role of a storage node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeRole {
    Main,
    Replica,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Main => f.pad("MAIN"),
            NodeRole::Replica => f.pad("REPLICA"),
        }
    }
}

/// A storage node provisioned from configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSeed {
    pub id: String,
    pub address: String,
    #[serde(default = "default_role")]
    pub role: NodeRole,
}

fn default_role() -> NodeRole {
    NodeRole::Replica
}

/// Naming service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Bind address for HTTP API
    pub bind_addr: SocketAddr,

    /// RocksDB path for metadata
    pub db_path: PathBuf,

    /// Health monitor period
    pub monitor_interval_secs: u64,

    /// Timeout for `/health` probes
    pub probe_timeout_ms: u64,

    /// Timeout for node-to-node replica transfers
    pub transfer_timeout_secs: u64,

    /// Timeout for proxied client uploads/downloads
    pub proxy_timeout_secs: u64,

    /// Timeout for per-node deletes
    pub delete_timeout_secs: u64,

    /// Max queue items processed per recovery pass
    pub recovery_batch_size: usize,

    /// FAILED items with fewer attempts than this can be reset to PENDING
    pub max_retries: u32,

    /// Storage nodes to provision at startup
    pub nodes: Vec<NodeSeed>,
}

impl CoordinatorConfig {
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs.max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }

    pub fn proxy_timeout(&self) -> Duration {
        Duration::from_secs(self.proxy_timeout_secs)
    }

    pub fn delete_timeout(&self) -> Duration {
        Duration::from_secs(self.delete_timeout_secs)
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.recovery_batch_size == 0 {
            return Err(crate::Error::InvalidConfig(
                "recovery_batch_size must be > 0".into(),
            ));
        }
        if self.probe_timeout_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "probe_timeout_ms must be > 0".into(),
            ));
        }
        let mains = self
            .nodes
            .iter()
            .filter(|n| n.role == NodeRole::Main)
            .count();
        if mains > 1 {
            return Err(crate::Error::InvalidConfig(format!(
                "{} nodes configured as MAIN, expected at most one",
                mains
            )));
        }
        Ok(())
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            db_path: PathBuf::from("./naming-data"),
            monitor_interval_secs: 30,
            probe_timeout_ms: 2_000,
            transfer_timeout_secs: 30,
            proxy_timeout_secs: 60,
            delete_timeout_secs: 10,
            recovery_batch_size: 100,
            max_retries: 5,
            nodes: Vec::new(),
        }
    }
}
