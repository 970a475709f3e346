//! Finalized ledger view.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use tokio::sync::watch;
use tracing::{debug, warn};

/// The finalized ledger: an append-only sequence of agreed values.
///
/// Instance `i` (1-based) lives at index `i - 1`. The consensus driver may
/// finalize instances out of order; only the contiguous prefix starting at
/// instance 1 is visible to readers. The visible length only ever grows, and
/// every growth is published on a watch channel so waiters wake without
/// polling.
#[derive(Debug)]
pub struct Ledger {
    inner: RwLock<LedgerInner>,
    length_tx: watch::Sender<usize>,
}

#[derive(Debug, Default)]
struct LedgerInner {
    /// Visible, contiguous entries.
    entries: Vec<String>,
    /// Finalized instances waiting for a gap below them to fill.
    pending: BTreeMap<u64, String>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    pub fn new() -> Self {
        let (length_tx, _) = watch::channel(0);
        Self {
            inner: RwLock::new(LedgerInner::default()),
            length_tx,
        }
    }

    /// Record the finalized value of `instance`.
    ///
    /// Returns `false` if the instance was already finalized; the existing
    /// entry is never replaced.
    pub fn finalize(&self, instance: u64, value: String) -> bool {
        if instance == 0 {
            warn!("Ignoring finalization of instance 0");
            return false;
        }

        let mut inner = self.inner.write();
        let visible = inner.entries.len() as u64;
        if instance <= visible || inner.pending.contains_key(&instance) {
            debug!(instance, "Instance already finalized");
            return false;
        }

        inner.pending.insert(instance, value);
        loop {
            let next_instance = inner.entries.len() as u64 + 1;
            match inner.pending.remove(&next_instance) {
                Some(next) => inner.entries.push(next),
                None => break,
            }
        }

        let length = inner.entries.len();
        if length as u64 > visible {
            debug!(instance, length, "Ledger advanced");
            self.length_tx.send_replace(length);
        }
        true
    }

    /// Number of visible entries.
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The value finalized for `instance`, if visible.
    pub fn get(&self, instance: u64) -> Option<String> {
        let index = usize::try_from(instance.checked_sub(1)?).ok()?;
        self.inner.read().entries.get(index).cloned()
    }

    /// All visible entries in ledger order.
    pub fn values(&self) -> Vec<String> {
        self.inner.read().entries.clone()
    }

    /// Entries from `index` (0-based) to the end; empty if `index` is past it.
    pub fn suffix_from(&self, index: usize) -> Vec<String> {
        let inner = self.inner.read();
        inner
            .entries
            .get(index..)
            .map(<[String]>::to_vec)
            .unwrap_or_default()
    }

    /// Wait until at least `target` entries are visible.
    ///
    /// There is no timeout: if the driver never finalizes the instance, this
    /// never returns.
    pub async fn wait_for_length(&self, target: usize) -> usize {
        let mut rx = self.length_tx.subscribe();
        let length = match rx.wait_for(|length| *length >= target).await {
            Ok(length) => *length,
            // The sender lives as long as `self`, so this is unreachable
            // while we hold a reference.
            Err(_) => self.len(),
        };
        length
    }

    /// Subscribe to visible-length updates.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.length_tx.subscribe()
    }
}
