//! Vote collection and quorum certificates.

use parking_lot::RwLock;
use std::collections::HashMap;
use tessera_types::{NodeId, NodeMessage, QuorumThreshold, Vote, VoteError};
use tracing::{debug, trace, warn};

/// A value backed by a quorum of votes at one (instance, round).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuorumCertificate {
    pub instance: u64,
    pub round: u64,
    pub value: String,
    /// Senders that voted for `value`, in arrival order.
    pub voters: Vec<NodeId>,
}

/// Collects votes keyed by (instance, round) and certifies values.
///
/// Votes are kept in arrival order. Duplicate votes from the same sender are
/// not suppressed here; that is left to the protocol layer above.
///
/// Safe to share between tasks: all state sits behind a single lock.
#[derive(Debug)]
pub struct VoteBucket {
    /// Quorum parameters, fixed at construction.
    threshold: QuorumThreshold,
    /// (instance, round) -> votes in arrival order.
    votes: RwLock<HashMap<(u64, u64), Vec<Vote>>>,
}

impl VoteBucket {
    /// Create a bucket for a cluster of `cluster_size` nodes.
    pub fn new(cluster_size: usize) -> Self {
        Self::with_threshold(QuorumThreshold::new(cluster_size))
    }

    pub fn with_threshold(threshold: QuorumThreshold) -> Self {
        debug!(
            cluster_size = threshold.cluster_size(),
            max_faulty = threshold.max_faulty(),
            quorum = threshold.quorum(),
            "Vote bucket created"
        );
        Self {
            threshold,
            votes: RwLock::new(HashMap::new()),
        }
    }

    pub fn threshold(&self) -> QuorumThreshold {
        self.threshold
    }

    /// Minimum number of matching votes for a certificate.
    pub fn quorum(&self) -> usize {
        self.threshold.quorum()
    }

    /// Record a vote under its (instance, round).
    pub fn add_vote(&self, vote: Vote) {
        trace!(
            instance = vote.instance,
            round = vote.round,
            sender = %vote.sender,
            "Adding vote"
        );
        self.votes
            .write()
            .entry((vote.instance, vote.round))
            .or_default()
            .push(vote);
    }

    /// Parse the vote carried by a node message and record it.
    pub fn add_message(&self, message: &NodeMessage) -> Result<Vote, VoteError> {
        let vote = Vote::from_message(message)?;
        self.add_vote(vote.clone());
        Ok(vote)
    }

    /// The value certified at (instance, round), if any.
    ///
    /// Returns the first value, in vote arrival order, whose count reaches the
    /// quorum. Votes arriving after that point cannot change the result.
    /// Returns `None` when no value reaches the quorum or no votes exist.
    pub fn certified_value(&self, instance: u64, round: u64) -> Option<String> {
        self.certificate(instance, round).map(|qc| qc.value)
    }

    /// Like [`certified_value`](Self::certified_value), with the backing voters.
    pub fn certificate(&self, instance: u64, round: u64) -> Option<QuorumCertificate> {
        let votes = self.votes.read();
        let round_votes = votes.get(&(instance, round))?;

        let mut frequency: HashMap<&str, usize> = HashMap::new();
        let certified = round_votes.iter().find_map(|vote| {
            let count = frequency.entry(vote.value.as_str()).or_insert(0);
            *count += 1;
            self.threshold
                .is_quorum(*count)
                .then(|| vote.value.clone())
        })?;

        let voters = round_votes
            .iter()
            .filter(|vote| vote.value == certified)
            .map(|vote| vote.sender.clone())
            .collect();

        Some(QuorumCertificate {
            instance,
            round,
            value: certified,
            voters,
        })
    }

    /// Senders at (instance, round) whose vote differs from `certified`.
    ///
    /// Each offender is logged as a possible byzantine node. This is advisory:
    /// the certificate itself stands.
    pub fn detect_conflicts(&self, certified: &str, instance: u64, round: u64) -> Vec<NodeId> {
        let votes = self.votes.read();
        let Some(round_votes) = votes.get(&(instance, round)) else {
            return vec![];
        };

        round_votes
            .iter()
            .filter(|vote| vote.value != certified)
            .map(|vote| {
                warn!(
                    instance,
                    round,
                    sender = %vote.sender,
                    voted = %vote.value,
                    certified = %certified,
                    "Conflicting vote received, sender may be byzantine"
                );
                vote.sender.clone()
            })
            .collect()
    }

    /// Number of votes recorded at (instance, round).
    pub fn vote_count(&self, instance: u64, round: u64) -> usize {
        self.votes
            .read()
            .get(&(instance, round))
            .map_or(0, Vec::len)
    }

    /// Drop all votes for instances below `instance`.
    pub fn prune_below(&self, instance: u64) {
        let mut votes = self.votes.write();
        let before = votes.len();
        votes.retain(|&(i, _), _| i >= instance);
        debug!(
            below = instance,
            removed = before - votes.len(),
            "Pruned vote bucket"
        );
    }
}
