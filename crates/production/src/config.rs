//! Node configuration.
//!
//! Example TOML:
//!
//! ```toml
//! [node]
//! id = "1"
//! key_path = "keys/node1.key"
//! cluster_path = "cluster.toml"
//!
//! [[clients]]
//! id = "client-1"
//! public_key = "5f0c...e2"
//!
//! [service]
//! replay_completed = false
//! max_datagram_size = 65507
//!
//! [metrics]
//! enabled = true
//! listen_addr = "127.0.0.1:9090"
//!
//! [consensus]
//! faulty = ["4"]
//! ```
//!
//! Relative paths are resolved against the directory of the config file.

use crate::network::{TransportConfig, MAX_UDP_PAYLOAD};
use crate::service::{ClientDirectory, ServiceConfig};
use serde::Deserialize;
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tessera_types::{
    ClientId, ClusterConfig, ClusterError, ClusterMember, KeyPair, NodeId, PublicKey, SigningError,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
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

    #[error("Invalid cluster configuration: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Node {0} is not a member of the cluster")]
    UnknownNode(NodeId),

    #[error("Faulty member {0} is not in the cluster")]
    UnknownFaultyMember(NodeId),

    #[error("Failed to load signing key: {0}")]
    Key(#[from] SigningError),

    #[error("Signing key does not match the cluster entry for node {0}")]
    KeyMismatch(NodeId),

    #[error("Invalid metrics listen address {addr}: {reason}")]
    MetricsAddr { addr: String, reason: String },
}

/// Top-level node configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Node identity configuration
    pub node: NodeSection,

    /// Clients allowed to submit requests
    #[serde(default)]
    pub clients: Vec<ClientEntry>,

    /// Request handling configuration
    #[serde(default)]
    pub service: ServiceSection,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsSection,

    /// In-process consensus configuration
    #[serde(default)]
    pub consensus: ConsensusSection,
}

/// Node identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeSection {
    /// This node's id in the cluster file
    pub id: NodeId,

    /// Path to the ed25519 seed file
    pub key_path: PathBuf,

    /// Path to the cluster membership file
    pub cluster_path: PathBuf,
}

/// A client allowed to submit requests.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientEntry {
    pub id: ClientId,

    /// Hex-encoded ed25519 public key
    pub public_key: PublicKey,
}

/// Request handling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSection {
    /// Re-send the cached reply to a retransmitted request
    #[serde(default)]
    pub replay_completed: bool,

    /// Receive buffer size in bytes
    #[serde(default = "default_max_datagram_size")]
    pub max_datagram_size: usize,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            replay_completed: false,
            max_datagram_size: default_max_datagram_size(),
        }
    }
}

fn default_max_datagram_size() -> usize {
    MAX_UDP_PAYLOAD
}

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSection {
    /// Enable metrics endpoint. Off by default so several nodes can share a
    /// host without competing for the port.
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Metrics HTTP listen address
    #[serde(default = "default_metrics_addr")]
    pub listen_addr: String,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen_addr: default_metrics_addr(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    false
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

/// In-process consensus configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConsensusSection {
    /// Members that vote for forged values, for exercising byzantine detection
    #[serde(default)]
    pub faulty: Vec<NodeId>,
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    /// Make relative key and cluster paths relative to `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        if self.node.key_path.is_relative() {
            self.node.key_path = base.join(&self.node.key_path);
        }
        if self.node.cluster_path.is_relative() {
            self.node.cluster_path = base.join(&self.node.cluster_path);
        }
    }

    /// Load the cluster file and check this node and the faulty list against it.
    pub fn load_cluster(&self) -> Result<ClusterConfig, ConfigError> {
        let cluster = ClusterConfig::load(&self.node.cluster_path)?;
        if cluster.member(&self.node.id).is_none() {
            return Err(ConfigError::UnknownNode(self.node.id.clone()));
        }
        if let Some(unknown) = self
            .consensus
            .faulty
            .iter()
            .find(|id| cluster.member(id).is_none())
        {
            return Err(ConfigError::UnknownFaultyMember(unknown.clone()));
        }
        Ok(cluster)
    }

    /// This node's entry in `cluster`.
    pub fn member<'a>(&self, cluster: &'a ClusterConfig) -> Result<&'a ClusterMember, ConfigError> {
        cluster
            .member(&self.node.id)
            .ok_or_else(|| ConfigError::UnknownNode(self.node.id.clone()))
    }

    /// Load the signing key and check it against the node's cluster entry.
    pub fn load_keypair(&self, cluster: &ClusterConfig) -> Result<KeyPair, ConfigError> {
        let keypair = KeyPair::load(&self.node.key_path)?;
        if self.member(cluster)?.public_key != keypair.public_key() {
            return Err(ConfigError::KeyMismatch(self.node.id.clone()));
        }
        Ok(keypair)
    }

    pub fn client_directory(&self) -> ClientDirectory {
        self.clients
            .iter()
            .map(|client| (client.id.clone(), client.public_key))
            .collect()
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig::default()
            .with_replay_completed(self.service.replay_completed)
            .with_transport(
                TransportConfig::default().with_max_datagram_size(self.service.max_datagram_size),
            )
    }

    /// Metrics address, if the endpoint is enabled.
    pub fn metrics_addr(&self) -> Result<Option<SocketAddr>, ConfigError> {
        if !self.metrics.enabled {
            return Ok(None);
        }
        self.metrics
            .listen_addr
            .parse()
            .map(Some)
            .map_err(|e: std::net::AddrParseError| ConfigError::MetricsAddr {
                addr: self.metrics.listen_addr.clone(),
                reason: e.to_string(),
            })
    }
}
