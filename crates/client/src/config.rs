//! Configuration for ledger clients.
//!
//! Example TOML:
//!
//! ```toml
//! id = "client-1"
//! key_path = "keys/client1.key"
//! cluster_path = "cluster.toml"
//! retry_interval_ms = 100
//! ```

use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tessera_production::network::{TransportConfig, MAX_UDP_PAYLOAD};
use tessera_types::ClientId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Configuration for one ledger client.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Client identifier, as registered with the nodes
    pub id: ClientId,

    /// Path to the ed25519 seed file
    pub key_path: PathBuf,

    /// Path to the cluster membership file
    pub cluster_path: PathBuf,

    /// Delay between retransmissions in milliseconds
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Receive buffer size in bytes
    #[serde(default = "default_max_datagram_size")]
    pub max_datagram_size: usize,
}

fn default_retry_interval_ms() -> u64 {
    100
}

fn default_max_datagram_size() -> usize {
    MAX_UDP_PAYLOAD
}

impl ClientConfig {
    /// Load configuration from a TOML file.
    ///
    /// Relative paths are resolved against the directory of the file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ClientConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ClientConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self =
            toml::from_str(&contents).map_err(|source| ClientConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        if let Some(base) = path.parent() {
            if config.key_path.is_relative() {
                config.key_path = base.join(&config.key_path);
            }
            if config.cluster_path.is_relative() {
                config.cluster_path = base.join(&config.cluster_path);
            }
        }
        Ok(config)
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig::default()
            .with_retry_interval(Duration::from_millis(self.retry_interval_ms))
            .with_max_datagram_size(self.max_datagram_size)
    }
}
