//! Ledger request orchestrator.
//!
//! The [`LedgerService`] turns authenticated client requests into consensus
//! instances and answers with the part of the ledger the client has not seen.
//!
//! # Request Flow
//!
//! ```text
//! datagram ──► authenticate ──► register (client, seq) ──► start_consensus
//!                  │                    │                        │
//!               drop on              duplicate:             wait until ledger
//!               failure              no reply               covers the instance
//!                                                                │
//!                                               reply {instance, ledger suffix}
//! ```
//!
//! Each datagram is handled on its own task; the receive loop never waits for
//! a request to finish.

use crate::metrics;
use crate::network::{
    decode, AuthenticationError, SignedEnvelope, SignedTransport, TransportConfig, TransportError,
};
use crate::registry::RequestRegistry;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tessera_bft::ConsensusDriver;
use tessera_types::{ClientId, ClientRequest, ClientResponse, KeyPair, PublicKey, RequestKind};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// First pause after a failed receive; doubles per consecutive failure.
const RECV_BACKOFF_BASE: Duration = Duration::from_millis(10);
const RECV_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Reasons an inbound request is dropped without a reply.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Authentication failed: {0}")]
    Authentication(#[from] AuthenticationError),
}

/// Service behaviour knobs.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    /// Answer a retransmitted request with the reply already sent for it.
    ///
    /// Off by default: duplicates get no reply at all.
    pub replay_completed: bool,

    pub transport: TransportConfig,
}

impl ServiceConfig {
    pub fn with_replay_completed(mut self, enabled: bool) -> Self {
        self.replay_completed = enabled;
        self
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }
}

/// Public keys of the clients allowed to submit requests.
#[derive(Debug, Clone, Default)]
pub struct ClientDirectory {
    keys: HashMap<ClientId, PublicKey>,
}

impl ClientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(mut self, id: ClientId, key: PublicKey) -> Self {
        self.insert(id, key);
        self
    }

    pub fn insert(&mut self, id: ClientId, key: PublicKey) {
        self.keys.insert(id, key);
    }

    pub fn get(&self, id: &ClientId) -> Option<&PublicKey> {
        self.keys.get(id)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl FromIterator<(ClientId, PublicKey)> for ClientDirectory {
    fn from_iter<I: IntoIterator<Item = (ClientId, PublicKey)>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

/// Handle for stopping a running service.
///
/// Dropping the handle also stops the receive loop. Requests already being
/// handled run to completion.
pub struct ServiceHandle {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ServiceHandle {
    /// Address the service is receiving on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Trigger shutdown (consumes the handle).
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Trigger shutdown and wait for the receive loop to exit.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Serves client requests on top of a consensus driver.
pub struct LedgerService {
    driver: Arc<dyn ConsensusDriver>,
    registry: RequestRegistry,
    clients: ClientDirectory,
    config: ServiceConfig,
}

impl LedgerService {
    pub fn new(
        driver: Arc<dyn ConsensusDriver>,
        clients: ClientDirectory,
        config: ServiceConfig,
    ) -> Self {
        let registry = if config.replay_completed {
            RequestRegistry::with_response_cache()
        } else {
            RequestRegistry::new()
        };
        Self {
            driver,
            registry,
            clients,
            config,
        }
    }

    pub fn registry(&self) -> &RequestRegistry {
        &self.registry
    }

    pub fn driver(&self) -> &Arc<dyn ConsensusDriver> {
        &self.driver
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Handle one authenticated request.
    ///
    /// Returns `None` for a retransmission of an accepted request, unless
    /// replay is enabled and the original has completed. Otherwise starts a
    /// consensus instance and waits, without bound, until the ledger covers it.
    pub async fn handle_request(&self, request: ClientRequest) -> Option<ClientResponse> {
        let client = &request.client_id;
        let seq = request.client_seq;
        metrics::record_request_received(kind_label(request.kind));

        if !self.registry.register(client, seq) {
            metrics::record_duplicate_request();
            if self.config.replay_completed {
                if let Some(response) = self.registry.completed(client, seq) {
                    debug!(client = %client, seq, "Replaying response to duplicate request");
                    return Some(response);
                }
            }
            debug!(client = %client, seq, "Ignoring duplicate request");
            return None;
        }

        let instance = self
            .driver
            .start_consensus(request.proposed_value().to_string());
        metrics::record_consensus_started();
        debug!(
            client = %client,
            seq,
            kind = ?request.kind,
            instance,
            "Consensus started for request"
        );

        let ledger = self.driver.ledger();
        let target = usize::try_from(instance).unwrap_or(usize::MAX);
        let length = ledger.wait_for_length(target).await;
        metrics::set_ledger_length(length);

        let response = ClientResponse {
            finalized_instance: instance,
            ledger_suffix: ledger.suffix_from(request.known_ledger_length),
        };
        self.registry.complete(client, seq, &response);
        Some(response)
    }

    /// Parse and verify a datagram as a request from a known client.
    pub fn authenticate(&self, datagram: &[u8]) -> Result<ClientRequest, ServiceError> {
        let envelope = SignedEnvelope::from_bytes(datagram)
            .map_err(|e| ServiceError::MalformedRequest(e.to_string()))?;

        // Unverified: only used to find the key to verify with.
        let claimed: ClientRequest = envelope
            .peek()
            .map_err(|e| ServiceError::MalformedRequest(e.to_string()))?;
        let key = self.clients.get(&claimed.client_id).ok_or_else(|| {
            AuthenticationError::UnknownSigner(claimed.client_id.to_string())
        })?;

        let request: ClientRequest = decode(&envelope, key)?;
        if request.client_seq == 0 {
            return Err(ServiceError::MalformedRequest(
                "clientSeq must be at least 1".to_string(),
            ));
        }
        Ok(request)
    }

    /// Bind `addr` and serve requests until the returned handle is stopped.
    ///
    /// Replies are signed with `keypair`. Failing to bind is fatal; every
    /// per-datagram failure is logged and the loop carries on.
    pub async fn listen(
        self: Arc<Self>,
        addr: SocketAddr,
        keypair: KeyPair,
    ) -> Result<ServiceHandle, TransportError> {
        let transport =
            Arc::new(SignedTransport::bind(addr, keypair, self.config.transport.clone()).await?);
        let local_addr = transport.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        info!(
            addr = %local_addr,
            clients = self.clients.len(),
            replay_completed = self.config.replay_completed,
            "Ledger service listening"
        );
        let task = tokio::spawn(self.receive_loop(transport, shutdown_rx));

        Ok(ServiceHandle {
            local_addr,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    async fn receive_loop(
        self: Arc<Self>,
        transport: Arc<SignedTransport>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        let mut failures: u32 = 0;
        loop {
            let pause = tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Ledger service shutting down");
                    break;
                }
                received = transport.recv() => match received {
                    Ok((datagram, source)) => {
                        failures = 0;
                        let service = self.clone();
                        let transport = transport.clone();
                        tokio::spawn(async move {
                            service.process_datagram(&transport, &datagram, source).await;
                        });
                        None
                    }
                    Err(e) => {
                        failures = failures.saturating_add(1);
                        let pause = recv_backoff(failures);
                        warn!(error = %e, failures, ?pause, "Receive failed");
                        Some(pause)
                    }
                },
            };

            if let Some(pause) = pause {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        info!("Ledger service shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }
    }

    async fn process_datagram(&self, transport: &SignedTransport, datagram: &[u8], source: SocketAddr) {
        let request = match self.authenticate(datagram) {
            Ok(request) => request,
            Err(ServiceError::Authentication(e)) => {
                metrics::record_authentication_failure();
                warn!(%source, error = %e, "Dropping unauthenticated request");
                return;
            }
            Err(e) => {
                metrics::record_malformed_request();
                warn!(%source, error = %e, "Dropping malformed request");
                return;
            }
        };

        let started = Instant::now();
        let client = request.client_id.clone();
        let seq = request.client_seq;
        let Some(response) = self.handle_request(request).await else {
            return;
        };

        match transport.send(&response, source).await {
            Ok(()) => {
                metrics::record_response_sent(started.elapsed().as_secs_f64());
                debug!(
                    client = %client,
                    seq,
                    instance = response.finalized_instance,
                    values = response.ledger_suffix.len(),
                    "Response sent"
                );
            }
            Err(e) => {
                metrics::record_send_failure();
                warn!(client = %client, seq, %source, error = %e, "Failed to send response");
            }
        }
    }
}

/// Pause before receiving again after `failures` consecutive errors.
fn recv_backoff(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    RECV_BACKOFF_BASE
        .saturating_mul(1 << exponent)
        .min(RECV_BACKOFF_MAX)
}

fn kind_label(kind: RequestKind) -> &'static str {
    match kind {
        RequestKind::Append => "append",
        RequestKind::Read => "read",
    }
}
