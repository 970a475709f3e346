//! Byzantine quorum arithmetic.

use serde::{Deserialize, Serialize};

/// Quorum parameters for a cluster of fixed size.
///
/// For `n` nodes the cluster tolerates `f = floor((n - 1) / 3)` faulty nodes
/// and a quorum needs `Q = floor((n + f) / 2) + 1` matching votes. Any two
/// quorums then intersect in at least one correct node when `n >= 3f + 1`.
///
/// Computed once from `n` and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumThreshold {
    cluster_size: usize,
    max_faulty: usize,
    quorum: usize,
}

impl QuorumThreshold {
    pub fn new(cluster_size: usize) -> Self {
        let max_faulty = cluster_size.saturating_sub(1) / 3;
        let quorum = (cluster_size + max_faulty) / 2 + 1;
        Self {
            cluster_size,
            max_faulty,
            quorum,
        }
    }

    /// Number of nodes `n`.
    pub fn cluster_size(&self) -> usize {
        self.cluster_size
    }

    /// Maximum tolerated faulty nodes `f`.
    pub fn max_faulty(&self) -> usize {
        self.max_faulty
    }

    /// Minimum matching votes `Q`.
    pub fn quorum(&self) -> usize {
        self.quorum
    }

    /// Check whether `votes` matching votes form a quorum.
    pub fn is_quorum(&self, votes: usize) -> bool {
        votes >= self.quorum
    }
}
