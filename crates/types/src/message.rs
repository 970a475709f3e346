//! Logical messages exchanged between clients and nodes.
//!
//! Field names follow the JSON wire format, so they are renamed to camelCase
//! on serialization.

use crate::{ClientId, NodeId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of client request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestKind {
    /// Append `arg` to the ledger.
    Append,
    /// Read the ledger; drives an instance with an empty value.
    Read,
}

/// A request from a client to the cluster's entry node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRequest {
    #[serde(rename = "type")]
    pub kind: RequestKind,
    pub client_id: ClientId,
    /// Per-client counter starting at 1; with `client_id` it identifies the request.
    pub client_seq: u64,
    pub arg: String,
    /// Number of ledger entries the client already knows.
    #[serde(rename = "blockchainSize")]
    pub known_ledger_length: usize,
}

impl ClientRequest {
    pub fn append(
        client_id: ClientId,
        client_seq: u64,
        value: impl Into<String>,
        known_ledger_length: usize,
    ) -> Self {
        Self {
            kind: RequestKind::Append,
            client_id,
            client_seq,
            arg: value.into(),
            known_ledger_length,
        }
    }

    pub fn read(client_id: ClientId, client_seq: u64, known_ledger_length: usize) -> Self {
        Self {
            kind: RequestKind::Read,
            client_id,
            client_seq,
            arg: String::new(),
            known_ledger_length,
        }
    }

    /// The value to propose: `arg` for appends, empty for reads.
    pub fn proposed_value(&self) -> &str {
        match self.kind {
            RequestKind::Append => &self.arg,
            RequestKind::Read => "",
        }
    }
}

/// The cluster's reply to a client request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientResponse {
    /// Instance started for the request; finalized by the time of the reply.
    #[serde(rename = "consensusInstance")]
    pub finalized_instance: u64,
    /// Ledger entries from the request's known length onwards.
    #[serde(rename = "values")]
    pub ledger_suffix: Vec<String>,
}

impl ClientResponse {
    /// Whether this response could be the reply to a request made while the
    /// client knew `known_ledger_length` entries.
    ///
    /// Instances up to the known length were all started before the request,
    /// so a genuine reply names a later instance and its suffix reaches it.
    /// Replies to the client's earlier requests fail the first check.
    pub fn covers(&self, known_ledger_length: usize) -> bool {
        let known = known_ledger_length as u64;
        self.finalized_instance > known
            && known + self.ledger_suffix.len() as u64 >= self.finalized_instance
    }
}

/// Phase of the inter-node protocol a [`NodeMessage`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeMessageType {
    PrePrepare,
    Prepare,
    Commit,
    RoundChange,
}

/// A message between nodes with positional arguments.
///
/// Vote-carrying messages use `args = [instance, round, ..., value]`; the
/// value is always the last argument and intermediate arguments are ignored
/// by vote accounting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMessage {
    pub sender_id: NodeId,
    #[serde(rename = "type")]
    pub message_type: NodeMessageType,
    pub args: Vec<String>,
}

impl NodeMessage {
    /// Build a vote message for `(instance, round, value)`.
    pub fn vote(
        sender_id: NodeId,
        message_type: NodeMessageType,
        instance: u64,
        round: u64,
        value: impl Into<String>,
    ) -> Self {
        Self {
            sender_id,
            message_type,
            args: vec![instance.to_string(), round.to_string(), value.into()],
        }
    }
}

/// Errors extracting a vote from a [`NodeMessage`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VoteError {
    #[error("Vote message needs at least 3 arguments, got {0}")]
    TooFewArguments(usize),

    #[error("Invalid {field} argument: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("{field} must be at least 1")]
    ZeroIndex { field: &'static str },
}

/// A single node's vote for a value at one (instance, round).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Vote {
    pub instance: u64,
    pub round: u64,
    pub sender: NodeId,
    pub value: String,
}

impl Vote {
    pub fn new(instance: u64, round: u64, sender: NodeId, value: impl Into<String>) -> Self {
        Self {
            instance,
            round,
            sender,
            value: value.into(),
        }
    }

    /// Extract the vote carried by a node message.
    pub fn from_message(message: &NodeMessage) -> Result<Self, VoteError> {
        let args = &message.args;
        if args.len() < 3 {
            return Err(VoteError::TooFewArguments(args.len()));
        }
        let instance = parse_index("instance", &args[0])?;
        let round = parse_index("round", &args[1])?;
        let value = args[args.len() - 1].clone();

        Ok(Self {
            instance,
            round,
            sender: message.sender_id.clone(),
            value,
        })
    }
}

fn parse_index(field: &'static str, value: &str) -> Result<u64, VoteError> {
    let parsed: u64 = value.parse().map_err(|_| VoteError::InvalidNumber {
        field,
        value: value.to_string(),
    })?;
    if parsed == 0 {
        return Err(VoteError::ZeroIndex { field });
    }
    Ok(parsed)
}
