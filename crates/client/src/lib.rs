//! Client library for the Tessera replicated ledger.
//!
//! A [`LedgerClient`] talks to the cluster leader over signed UDP. Each call
//! blocks until the leader answers with a finalized result, retransmitting the
//! request as often as needed, and folds the returned entries into the
//! client's copy of the ledger.
//!
//! ```no_run
//! # async fn example() -> Result<(), tessera_client::ClientError> {
//! use tessera_client::{ClientConfig, LedgerClient};
//!
//! let config = ClientConfig::load("client.toml")?;
//! let mut client = LedgerClient::connect(&config).await?;
//! client.append("hello").await?;
//! println!("{:?}", client.ledger());
//! # Ok(())
//! # }
//! ```

pub mod config;

pub use config::{ClientConfig, ClientConfigError};

use std::net::SocketAddr;
use std::sync::Arc;
use tessera_production::network::{
    resolve, ReliableSender, SignedTransport, TransportConfig, TransportError,
};
use tessera_types::{
    ClientId, ClientRequest, ClientResponse, ClusterConfig, ClusterError, KeyPair, PublicKey,
    SigningError,
};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ClientConfigError),

    #[error("Invalid cluster configuration: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Failed to load signing key: {0}")]
    Key(#[from] SigningError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A client session with the cluster leader.
///
/// Requests are numbered from 1 (or from
/// [`with_first_seq`](Self::with_first_seq)) and the leader remembers every
/// number it has seen, so a number is never reused within the session.
pub struct LedgerClient {
    id: ClientId,
    sender: ReliableSender,
    leader_addr: SocketAddr,
    leader_key: PublicKey,
    next_seq: u64,
    /// Every ledger entry learned so far, in order.
    ledger: Vec<String>,
}

impl LedgerClient {
    /// Open a session with the leader named in the configured cluster file.
    pub async fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let cluster = ClusterConfig::load(&config.cluster_path)?;
        let leader = cluster.leader()?;
        let leader_addr = resolve(&leader.hostname, leader.client_port).await?;
        let keypair = KeyPair::load(&config.key_path)?;

        info!(
            client = %config.id,
            leader = %leader.id,
            %leader_addr,
            "Connecting to leader"
        );
        Self::new(
            config.id.clone(),
            keypair,
            leader_addr,
            leader.public_key,
            config.transport_config(),
        )
        .await
    }

    /// Open a session with a leader at a known address.
    pub async fn new(
        id: ClientId,
        keypair: KeyPair,
        leader_addr: SocketAddr,
        leader_key: PublicKey,
        transport: TransportConfig,
    ) -> Result<Self, ClientError> {
        let bind_addr: SocketAddr = if leader_addr.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let transport = SignedTransport::bind(bind_addr, keypair, transport).await?;
        Ok(Self {
            id,
            sender: ReliableSender::new(Arc::new(transport)),
            leader_addr,
            leader_key,
            next_seq: 1,
            ledger: Vec::new(),
        })
    }

    /// Start numbering requests at `seq`.
    pub fn with_first_seq(mut self, seq: u64) -> Self {
        self.next_seq = seq.max(1);
        self
    }

    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Sequence number the next request will carry.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// The ledger entries learned so far, including the empty entries
    /// recorded by reads.
    pub fn ledger(&self) -> &[String] {
        &self.ledger
    }

    /// Append `value` and return the entries this call learned.
    ///
    /// Blocks until the leader answers; there is no timeout.
    pub async fn append(&mut self, value: impl Into<String>) -> Result<Vec<String>, ClientError> {
        let request =
            ClientRequest::append(self.id.clone(), self.take_seq(), value, self.ledger.len());
        self.submit(request).await
    }

    /// Fetch the entries finalized since the last call.
    ///
    /// Blocks until the leader answers; there is no timeout.
    pub async fn read(&mut self) -> Result<Vec<String>, ClientError> {
        let request = ClientRequest::read(self.id.clone(), self.take_seq(), self.ledger.len());
        self.submit(request).await
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    async fn submit(&mut self, request: ClientRequest) -> Result<Vec<String>, ClientError> {
        let known = request.known_ledger_length;
        let (response, stats) = self
            .sender
            .send_until_acknowledged(
                &request,
                self.leader_addr,
                &self.leader_key,
                |response: &ClientResponse| response.covers(known),
            )
            .await?;

        debug!(
            seq = request.client_seq,
            instance = response.finalized_instance,
            new_values = response.ledger_suffix.len(),
            attempts = stats.attempts,
            "Request finalized"
        );
        self.ledger.extend(response.ledger_suffix.iter().cloned());
        Ok(response.ledger_suffix)
    }
}

/// Entries with the empty values that reads leave in the ledger removed.
pub fn visible_values(values: &[String]) -> Vec<&str> {
    values
        .iter()
        .map(String::as_str)
        .filter(|value| !value.is_empty())
        .collect()
}
