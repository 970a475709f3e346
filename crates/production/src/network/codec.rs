//! Signed envelope encoding and decoding.
//!
//! # Wire Format
//!
//! ```text
//! {"message": "<JSON-encoded payload>", "signature": "<hex ed25519 signature>"}
//! ```
//!
//! The signature covers exactly the UTF-8 bytes of `message`. Receivers must
//! verify it against the key of the sender they expect; [`decode`] does both
//! steps and only then parses the payload.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tessera_types::{CryptoError, KeyPair, PublicKey, Signature, SigningError};
use thiserror::Error;

/// Reasons a received envelope is rejected. Receivers drop the message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    #[error("Datagram is not a signed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Invalid signature encoding: {0}")]
    InvalidSignatureEncoding(CryptoError),

    #[error("Signature does not verify under the expected key")]
    InvalidSignature,

    #[error("No public key known for sender {0}")]
    UnknownSigner(String),

    #[error("Payload is not a valid {expected}: {reason}")]
    InvalidPayload {
        expected: &'static str,
        reason: String,
    },
}

/// A JSON message and the signature over its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    pub message: String,
    pub signature: String,
}

impl SignedEnvelope {
    /// Serialize the envelope into a datagram payload.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SigningError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a datagram payload into an envelope. The signature is not checked.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AuthenticationError> {
        serde_json::from_slice(bytes)
            .map_err(|e| AuthenticationError::MalformedEnvelope(e.to_string()))
    }

    /// Parse the payload WITHOUT verifying the signature.
    ///
    /// Only for learning the claimed sender so the right key can be passed to
    /// [`decode`]. Nothing read here may be acted upon before that succeeds.
    pub fn peek<T: DeserializeOwned>(&self) -> Result<T, AuthenticationError> {
        parse_payload(&self.message)
    }
}

/// Serialize `payload` and sign it with `key`.
pub fn encode<T: Serialize>(payload: &T, key: &KeyPair) -> Result<SignedEnvelope, SigningError> {
    let message = serde_json::to_string(payload)?;
    let signature = key.sign(message.as_bytes()).to_hex();
    Ok(SignedEnvelope { message, signature })
}

/// Verify `envelope` against `signer` and parse its payload.
pub fn decode<T: DeserializeOwned>(
    envelope: &SignedEnvelope,
    signer: &PublicKey,
) -> Result<T, AuthenticationError> {
    let signature = Signature::from_hex(&envelope.signature)
        .map_err(AuthenticationError::InvalidSignatureEncoding)?;
    signer
        .verify(envelope.message.as_bytes(), &signature)
        .map_err(|_| AuthenticationError::InvalidSignature)?;
    parse_payload(&envelope.message)
}

/// Parse a raw datagram, verify it against `signer` and parse its payload.
pub fn decode_datagram<T: DeserializeOwned>(
    bytes: &[u8],
    signer: &PublicKey,
) -> Result<T, AuthenticationError> {
    decode(&SignedEnvelope::from_bytes(bytes)?, signer)
}

fn parse_payload<T: DeserializeOwned>(message: &str) -> Result<T, AuthenticationError> {
    serde_json::from_str(message).map_err(|e| AuthenticationError::InvalidPayload {
        expected: short_type_name::<T>(),
        reason: e.to_string(),
    })
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}
