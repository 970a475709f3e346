//! Consensus driver interface.

use crate::Ledger;

/// The protocol that proposes and finalizes ledger values.
///
/// The request orchestrator only starts instances and reads the resulting
/// ledger; how an instance gets decided is up to the implementation.
pub trait ConsensusDriver: Send + Sync {
    /// Start agreement on `value` and return the instance number it targets.
    ///
    /// The instance is not necessarily finalized when this returns; wait on
    /// [`Ledger::wait_for_length`] for that.
    fn start_consensus(&self, value: String) -> u64;

    /// The finalized ledger this driver writes to.
    fn ledger(&self) -> &Ledger;
}
