//! Static cluster membership.

use crate::{NodeId, PublicKey, QuorumThreshold};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors loading cluster membership.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Failed to read cluster file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse cluster file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Cluster has no members")]
    Empty,

    #[error("Cluster has no leader entry")]
    MissingLeader,

    #[error("Duplicate member id {0}")]
    DuplicateMember(NodeId),
}

/// A node of the cluster, as listed in the membership file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMember {
    pub id: NodeId,
    pub hostname: String,
    /// Port serving client requests.
    pub client_port: u16,
    /// Port for inter-node traffic.
    pub node_port: u16,
    pub public_key: PublicKey,
    #[serde(default)]
    pub leader: bool,
}

/// The full, immutable membership of a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    members: Vec<ClusterMember>,
}

impl ClusterConfig {
    pub fn new(members: Vec<ClusterMember>) -> Self {
        Self { members }
    }

    /// Load membership from a TOML file of `[[members]]` tables.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ClusterError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ClusterError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: ClusterConfig =
            toml::from_str(&contents).map_err(|source| ClusterError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the membership is non-empty and ids are unique.
    pub fn validate(&self) -> Result<(), ClusterError> {
        if self.members.is_empty() {
            return Err(ClusterError::Empty);
        }
        for (i, member) in self.members.iter().enumerate() {
            if self.members[..i].iter().any(|m| m.id == member.id) {
                return Err(ClusterError::DuplicateMember(member.id.clone()));
            }
        }
        Ok(())
    }

    pub fn members(&self) -> &[ClusterMember] {
        &self.members
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn quorum(&self) -> QuorumThreshold {
        QuorumThreshold::new(self.size())
    }

    pub fn member(&self, id: &NodeId) -> Option<&ClusterMember> {
        self.members.iter().find(|m| &m.id == id)
    }

    /// The designated leader, which serves as the clients' entry node.
    pub fn leader(&self) -> Result<&ClusterMember, ClusterError> {
        self.members
            .iter()
            .find(|m| m.leader)
            .ok_or(ClusterError::MissingLeader)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.members.iter().map(|m| &m.id)
    }
}
