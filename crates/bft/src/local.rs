//! In-process consensus driver.
//!
//! Runs the committee's votes for each instance through a [`VoteBucket`] in
//! the local process. Useful for development nodes and simulation; a
//! networked protocol implements [`ConsensusDriver`] the same way but gathers
//! the votes from peers.

use crate::{ConsensusDriver, Ledger, QuorumCertificate, VoteBucket};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tessera_types::{ClusterConfig, NodeId, NodeMessage, Vote, VoteError};
use tracing::{debug, info, warn};

/// Callback run for each certificate that finalizes an instance, with the
/// number of conflicting votes found alongside it.
pub type CertificateHook = Box<dyn Fn(&QuorumCertificate, usize) + Send + Sync>;

/// Round used for the committee's initial votes.
const FIRST_ROUND: u64 = 1;

/// Consensus driver that certifies instances in-process.
///
/// On [`start_consensus`](ConsensusDriver::start_consensus) every committee
/// member casts a first-round vote. Members registered as faulty vote a forged
/// value instead of the proposal. The instance is finalized once the bucket
/// certifies a value; otherwise it stays open until enough votes arrive
/// through [`on_vote`](Self::on_vote).
pub struct LocalConsensus {
    local_id: NodeId,
    committee: Vec<NodeId>,
    faulty: HashSet<NodeId>,
    bucket: Arc<VoteBucket>,
    ledger: Ledger,
    /// Next instance number to hand out.
    next_instance: Mutex<u64>,
    on_certificate: Option<CertificateHook>,
}

impl LocalConsensus {
    pub fn new(local_id: NodeId, committee: Vec<NodeId>) -> Self {
        let bucket = Arc::new(VoteBucket::new(committee.len()));
        Self {
            local_id,
            committee,
            faulty: HashSet::new(),
            bucket,
            ledger: Ledger::new(),
            next_instance: Mutex::new(1),
            on_certificate: None,
        }
    }

    /// Driver whose committee is every member of `cluster`.
    pub fn from_cluster(local_id: NodeId, cluster: &ClusterConfig) -> Self {
        Self::new(local_id, cluster.node_ids().cloned().collect())
    }

    /// Mark committee members that will vote for forged values.
    pub fn with_faulty(mut self, faulty: impl IntoIterator<Item = NodeId>) -> Self {
        self.faulty.extend(faulty);
        if self.faulty.len() > self.bucket.threshold().max_faulty() {
            warn!(
                faulty = self.faulty.len(),
                tolerated = self.bucket.threshold().max_faulty(),
                "More faulty members than the cluster tolerates; instances may never finalize"
            );
        }
        self
    }

    /// Run `hook` whenever a certificate finalizes an instance.
    pub fn with_certificate_hook(
        mut self,
        hook: impl Fn(&QuorumCertificate, usize) + Send + Sync + 'static,
    ) -> Self {
        self.on_certificate = Some(Box::new(hook));
        self
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    pub fn bucket(&self) -> &Arc<VoteBucket> {
        &self.bucket
    }

    /// Record a vote produced elsewhere and finalize its instance if the vote
    /// completes a quorum.
    pub fn on_vote(&self, message: &NodeMessage) -> Result<Option<QuorumCertificate>, VoteError> {
        let vote = self.bucket.add_message(message)?;
        Ok(self.try_finalize(vote.instance, vote.round))
    }

    fn try_finalize(&self, instance: u64, round: u64) -> Option<QuorumCertificate> {
        let qc = self.bucket.certificate(instance, round)?;
        if self.ledger.get(instance).is_some() {
            return Some(qc);
        }

        let conflicts = self.bucket.detect_conflicts(&qc.value, instance, round);
        if self.ledger.finalize(instance, qc.value.clone()) {
            info!(
                instance,
                round,
                voters = qc.voters.len(),
                conflicts = conflicts.len(),
                "Instance finalized"
            );
            if let Some(hook) = &self.on_certificate {
                hook(&qc, conflicts.len());
            }
        }
        Some(qc)
    }

    fn vote_value(&self, member: &NodeId, proposal: &str) -> String {
        if self.faulty.contains(member) {
            format!("forged-by-{member}")
        } else {
            proposal.to_string()
        }
    }
}

impl ConsensusDriver for LocalConsensus {
    fn start_consensus(&self, value: String) -> u64 {
        let instance = {
            let mut next = self.next_instance.lock();
            let instance = *next;
            *next += 1;
            instance
        };
        debug!(instance, value = %value, "Starting consensus");

        for member in &self.committee {
            let vote = Vote::new(
                instance,
                FIRST_ROUND,
                member.clone(),
                self.vote_value(member, &value),
            );
            self.bucket.add_vote(vote);
        }

        if self.try_finalize(instance, FIRST_ROUND).is_none() {
            warn!(
                instance,
                votes = self.bucket.vote_count(instance, FIRST_ROUND),
                quorum = self.bucket.quorum(),
                "No quorum for instance, waiting for further votes"
            );
        }
        instance
    }

    fn ledger(&self) -> &Ledger {
        &self.ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_types::test_utils::test_cluster;
    use tessera_types::NodeMessageType;
    use tracing_test::traced_test;

    fn committee(n: usize) -> Vec<NodeId> {
        (1..=n).map(|i| NodeId::new(i.to_string())).collect()
    }

    #[test]
    fn test_honest_committee_finalizes_in_order() {
        let driver = LocalConsensus::new(NodeId::new("1"), committee(4));

        assert_eq!(driver.start_consensus("a".into()), 1);
        assert_eq!(driver.start_consensus("b".into()), 2);
        assert_eq!(driver.ledger().values(), vec!["a", "b"]);
    }

    #[traced_test]
    #[test]
    fn test_tolerates_f_faulty_members() {
        let driver =
            LocalConsensus::new(NodeId::new("1"), committee(4)).with_faulty([NodeId::new("4")]);

        let instance = driver.start_consensus("X".into());
        assert_eq!(driver.ledger().get(instance), Some("X".to_string()));
        assert_eq!(
            driver.bucket().detect_conflicts("X", instance, 1),
            vec![NodeId::new("4")]
        );
        assert!(logs_contain("sender may be byzantine"));
    }

    #[traced_test]
    #[test]
    fn test_too_many_faulty_members_blocks_instance() {
        let driver = LocalConsensus::new(NodeId::new("1"), committee(4))
            .with_faulty([NodeId::new("3"), NodeId::new("4")]);

        let instance = driver.start_consensus("X".into());
        assert_eq!(instance, 1);
        assert!(driver.ledger().is_empty());
        assert!(logs_contain("No quorum for instance"));

        // A later round gathering a quorum finalizes it
        for sender in ["1", "2", "3"] {
            let message =
                NodeMessage::vote(NodeId::new(sender), NodeMessageType::Commit, instance, 2, "X");
            driver.on_vote(&message).unwrap();
        }
        assert_eq!(driver.ledger().values(), vec!["X"]);
    }

    #[test]
    fn test_on_vote_rejects_malformed_message() {
        let driver = LocalConsensus::new(NodeId::new("1"), committee(4));
        let message = NodeMessage {
            sender_id: NodeId::new("2"),
            message_type: NodeMessageType::Prepare,
            args: vec![],
        };
        assert!(driver.on_vote(&message).is_err());
    }

    #[test]
    fn test_certificate_hook() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let conflicts = Arc::new(AtomicUsize::new(0));
        let seen = conflicts.clone();
        let driver = LocalConsensus::new(NodeId::new("1"), committee(4))
            .with_faulty([NodeId::new("2")])
            .with_certificate_hook(move |qc, n| {
                assert_eq!(qc.value, "X");
                seen.fetch_add(n, Ordering::SeqCst);
            });

        driver.start_consensus("X".into());
        assert_eq!(conflicts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_from_cluster() {
        let (cluster, _) = test_cluster(7);
        let driver = LocalConsensus::from_cluster(NodeId::new("1"), &cluster);
        assert_eq!(driver.bucket().quorum(), 5);
        assert_eq!(driver.local_id(), &NodeId::new("1"));
    }

    #[test]
    fn test_concurrent_instances_are_contiguous() {
        let driver = Arc::new(LocalConsensus::new(NodeId::new("1"), committee(4)));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let driver = driver.clone();
                std::thread::spawn(move || driver.start_consensus(format!("v{i}")))
            })
            .collect();

        let mut instances: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        instances.sort_unstable();
        assert_eq!(instances, (1..=8).collect::<Vec<_>>());
        assert_eq!(driver.ledger().len(), 8);
    }
}
