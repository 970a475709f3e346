//! Authenticated datagram networking.
//!
//! Every datagram carries one [`SignedEnvelope`]: a JSON message and the
//! sender's ed25519 signature over its exact bytes. Receivers verify against
//! the public key they expect before acting on the message.
//!
//! - [`codec`]: envelope encoding, signing and verification
//! - [`SignedTransport`]: a UDP socket that signs everything it sends
//! - [`ReliableSender`]: retransmits a request until a matching signed
//!   response arrives

pub mod codec;
mod config;
mod reliable;
mod transport;

pub use codec::{decode, decode_datagram, encode, AuthenticationError, SignedEnvelope};
pub use config::{TransportConfig, MAX_UDP_PAYLOAD};
pub use reliable::{ReliableSender, RetryStats};
pub use transport::{resolve, SignedTransport, TransportError};
