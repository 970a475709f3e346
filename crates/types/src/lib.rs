//! Core types for the Tessera replicated ledger.
//!
//! This crate provides the foundational types shared by every other crate:
//!
//! - **Identifiers**: [`NodeId`], [`ClientId`]
//! - **Crypto**: ed25519 [`KeyPair`], [`PublicKey`] and [`Signature`]
//! - **Quorum arithmetic**: [`QuorumThreshold`]
//! - **Cluster membership**: [`ClusterMember`], [`ClusterConfig`]
//! - **Wire messages**: [`ClientRequest`], [`ClientResponse`], [`NodeMessage`], [`Vote`]
//!
//! # Design Philosophy
//!
//! This crate is self-contained and does not depend on any other workspace
//! crate, making it the foundation layer.

mod cluster;
mod crypto;
mod identifiers;
mod message;
mod quorum;

pub use cluster::{ClusterConfig, ClusterError, ClusterMember};
pub use crypto::{CryptoError, KeyPair, PublicKey, Signature, SigningError, SEED_LENGTH};
pub use identifiers::{ClientId, NodeId};
pub use message::{
    ClientRequest, ClientResponse, NodeMessage, NodeMessageType, RequestKind, Vote, VoteError,
};
pub use quorum::QuorumThreshold;

/// Test utilities.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::*;

    /// Create a deterministic keypair from a seed byte.
    pub fn test_keypair(seed: u8) -> KeyPair {
        KeyPair::from_seed(&[seed; SEED_LENGTH])
    }

    /// Create a cluster of `n` members on localhost with deterministic keys.
    ///
    /// Member `"1"` is the leader. Returns the config and the members' keys
    /// in the same order.
    pub fn test_cluster(n: usize) -> (ClusterConfig, Vec<KeyPair>) {
        let keys: Vec<KeyPair> = (0..n).map(|i| test_keypair(i as u8 + 1)).collect();
        let members = keys
            .iter()
            .enumerate()
            .map(|(i, key)| ClusterMember {
                id: NodeId::new((i + 1).to_string()),
                hostname: "127.0.0.1".to_string(),
                client_port: 3000 + i as u16,
                node_port: 4000 + i as u16,
                public_key: key.public_key(),
                leader: i == 0,
            })
            .collect();
        (ClusterConfig::new(members), keys)
    }
}
