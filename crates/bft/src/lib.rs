//! Byzantine agreement support for the Tessera ledger.
//!
//! This crate provides the pieces that sit between the client-facing service
//! and the multi-phase voting protocol:
//!
//! - [`VoteBucket`]: collects votes per (consensus instance, round), decides
//!   when a value has a byzantine quorum and reports conflicting voters
//! - [`Ledger`]: the finalized, append-only view of agreed values
//! - [`ConsensusDriver`]: the interface the service uses to start instances
//! - [`LocalConsensus`]: an in-process driver that certifies every instance
//!   through a [`VoteBucket`]
//!
//! # Terminology
//!
//! - **Instance**: one position in the ledger, numbered contiguously from 1.
//!
//! - **Round**: one attempt within an instance to reach agreement. A new round
//!   starts when the previous one fails to gather a quorum.
//!
//! - **Quorum (Q)**: `floor((n + f) / 2) + 1` matching votes at the same
//!   (instance, round), where `f = floor((n - 1) / 3)`.
//!
//! # Safety
//!
//! Any two quorums of size Q overlap in at least one correct node when
//! `n >= 3f + 1`, so two different values cannot both be certified in the
//! same round. The bucket does not check this assumption; it reports the first
//! value to reach Q and flags every sender that voted otherwise.

mod driver;
mod ledger;
mod local;
mod vote_bucket;

pub use driver::ConsensusDriver;
pub use ledger::Ledger;
pub use local::{CertificateHook, LocalConsensus};
pub use vote_bucket::{QuorumCertificate, VoteBucket};
