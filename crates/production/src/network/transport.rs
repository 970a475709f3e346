//! Signed UDP transport.

use super::codec::encode;
use super::config::TransportConfig;
use serde::Serialize;
use std::io;
use std::net::SocketAddr;
use tessera_types::{KeyPair, PublicKey, SigningError};
use thiserror::Error;
use tokio::net::{lookup_host, UdpSocket};
use tracing::{debug, trace, warn};

/// Errors from the datagram transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Failed to send to {destination}: {source}")]
    Send {
        destination: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Failed to receive: {0}")]
    Recv(#[source] io::Error),

    #[error("Could not resolve {host}:{port}: {reason}")]
    Resolve {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Failed to sign message: {0}")]
    Signing(#[from] SigningError),

    #[error("Retry task stopped unexpectedly: {0}")]
    RetryTask(String),
}

/// A UDP socket that signs every payload it sends with the local key.
///
/// Receiving is unauthenticated at this level: callers decide which key a
/// datagram must verify under and call [`decode`](super::decode).
#[derive(Debug)]
pub struct SignedTransport {
    socket: UdpSocket,
    keypair: KeyPair,
    config: TransportConfig,
}

impl SignedTransport {
    /// Bind a socket on `addr`. Port 0 picks an ephemeral port.
    pub async fn bind(
        addr: SocketAddr,
        keypair: KeyPair,
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        debug!(
            addr = %socket.local_addr().unwrap_or(addr),
            max_datagram_size = config.max_datagram_size,
            "Transport bound"
        );
        Ok(Self {
            socket,
            keypair,
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.socket.local_addr().map_err(TransportError::Recv)
    }

    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Sign `payload` and send it to `destination` as one datagram.
    pub async fn send<T: Serialize>(
        &self,
        payload: &T,
        destination: SocketAddr,
    ) -> Result<(), TransportError> {
        let bytes = encode(payload, &self.keypair)?.to_bytes()?;
        self.send_bytes(&bytes, destination).await
    }

    /// Like [`send`](Self::send), resolving `host` first.
    pub async fn send_to_host<T: Serialize>(
        &self,
        payload: &T,
        host: &str,
        port: u16,
    ) -> Result<(), TransportError> {
        let destination = resolve(host, port).await?;
        self.send(payload, destination).await
    }

    /// Send an already-encoded envelope.
    pub async fn send_bytes(
        &self,
        bytes: &[u8],
        destination: SocketAddr,
    ) -> Result<(), TransportError> {
        if bytes.len() > self.config.max_datagram_size {
            warn!(
                len = bytes.len(),
                max = self.config.max_datagram_size,
                %destination,
                "Outgoing datagram exceeds the configured receive buffer"
            );
        }
        self.socket
            .send_to(bytes, destination)
            .await
            .map_err(|source| TransportError::Send {
                destination,
                source,
            })?;
        trace!(len = bytes.len(), %destination, "Datagram sent");
        Ok(())
    }

    /// Wait for the next datagram.
    pub async fn recv(&self) -> Result<(Vec<u8>, SocketAddr), TransportError> {
        let mut buf = vec![0u8; self.config.max_datagram_size];
        let (len, source) = self
            .socket
            .recv_from(&mut buf)
            .await
            .map_err(TransportError::Recv)?;
        buf.truncate(len);
        trace!(len, %source, "Datagram received");
        Ok((buf, source))
    }
}

/// Resolve `host:port` to the first address returned.
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr, TransportError> {
    let resolve_error = |reason: String| TransportError::Resolve {
        host: host.to_string(),
        port,
        reason,
    };
    lookup_host((host, port))
        .await
        .map_err(|e| resolve_error(e.to_string()))?
        .next()
        .ok_or_else(|| resolve_error("no addresses returned".to_string()))
}
