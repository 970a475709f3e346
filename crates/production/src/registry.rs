//! Client request deduplication.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tessera_types::{ClientId, ClientResponse};

/// Remembers every `(client, sequence)` pair the service has accepted.
///
/// Entries are never pruned. When response caching is enabled, the reply to
/// each completed request is kept as well so a retransmission can be answered.
#[derive(Debug, Default)]
pub struct RequestRegistry {
    inner: Mutex<RegistryInner>,
    cache_responses: bool,
}

#[derive(Debug, Default)]
struct RegistryInner {
    seen: HashMap<ClientId, HashSet<u64>>,
    completed: HashMap<(ClientId, u64), ClientResponse>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that also keeps completed responses.
    pub fn with_response_cache() -> Self {
        Self {
            inner: Mutex::default(),
            cache_responses: true,
        }
    }

    /// Record `(client, seq)`. Returns `false` if it was already recorded.
    ///
    /// Atomic: of several concurrent calls with the same pair, exactly one
    /// returns `true`.
    pub fn register(&self, client: &ClientId, seq: u64) -> bool {
        self.inner
            .lock()
            .seen
            .entry(client.clone())
            .or_default()
            .insert(seq)
    }

    /// Store the reply sent for `(client, seq)` if caching is enabled.
    pub fn complete(&self, client: &ClientId, seq: u64, response: &ClientResponse) {
        if self.cache_responses {
            self.inner
                .lock()
                .completed
                .insert((client.clone(), seq), response.clone());
        }
    }

    /// The cached reply for `(client, seq)`, once that request has completed.
    pub fn completed(&self, client: &ClientId, seq: u64) -> Option<ClientResponse> {
        self.inner
            .lock()
            .completed
            .get(&(client.clone(), seq))
            .cloned()
    }

    pub fn contains(&self, client: &ClientId, seq: u64) -> bool {
        self.inner
            .lock()
            .seen
            .get(client)
            .is_some_and(|seqs| seqs.contains(&seq))
    }

    /// Number of requests recorded for `client`.
    pub fn seen_count(&self, client: &ClientId) -> usize {
        self.inner.lock().seen.get(client).map_or(0, HashSet::len)
    }
}
