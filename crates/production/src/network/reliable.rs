//! Retry-until-acknowledged requests over the signed transport.

use super::codec::{decode_datagram, encode};
use super::transport::{SignedTransport, TransportError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tessera_types::PublicKey;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

/// Observability data for one acknowledged request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryStats {
    /// Datagrams sent, including the first transmission.
    pub attempts: u32,
}

/// Sends requests and retransmits them until a matching response arrives.
///
/// There is no timeout. A request whose responder never answers is retried
/// until the returned future is dropped.
#[derive(Debug, Clone)]
pub struct ReliableSender {
    transport: Arc<SignedTransport>,
    retry_interval: Duration,
}

impl ReliableSender {
    /// Sender using the transport's configured retry interval.
    pub fn new(transport: Arc<SignedTransport>) -> Self {
        let retry_interval = transport.config().retry_interval;
        Self {
            transport,
            retry_interval,
        }
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn transport(&self) -> &Arc<SignedTransport> {
        &self.transport
    }

    /// Send `request` to `destination` every retry interval until a response
    /// signed by `responder` satisfies `matcher`.
    ///
    /// The first transmission is immediate. Datagrams that fail to verify or
    /// parse, and responses the matcher rejects, are ignored. Once a match is
    /// found the retry task is cancelled and awaited before returning, so no
    /// retransmission outlives the call.
    pub async fn send_until_acknowledged<Req, Resp, F>(
        &self,
        request: &Req,
        destination: SocketAddr,
        responder: &PublicKey,
        mut matcher: F,
    ) -> Result<(Resp, RetryStats), TransportError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
        F: FnMut(&Resp) -> bool,
    {
        let bytes = encode(request, self.transport.keypair())?.to_bytes()?;
        let attempts = Arc::new(AtomicU32::new(0));
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let mut retry = tokio::spawn(retry_loop(
            self.transport.clone(),
            bytes,
            destination,
            self.retry_interval,
            attempts.clone(),
            cancel_rx,
        ));

        let response = loop {
            tokio::select! {
                received = self.transport.recv() => {
                    let (datagram, source) = received?;
                    match decode_datagram::<Resp>(&datagram, responder) {
                        Ok(response) if matcher(&response) => break response,
                        Ok(_) => trace!(%source, "Ignoring response for another request"),
                        Err(e) => debug!(%source, error = %e, "Dropping unauthenticated datagram"),
                    }
                }
                finished = &mut retry => {
                    // The retry task only finishes on its own when a send fails.
                    return Err(match finished {
                        Ok(Err(e)) => e,
                        Ok(Ok(())) => TransportError::RetryTask("stopped before acknowledgement".into()),
                        Err(e) => TransportError::RetryTask(e.to_string()),
                    });
                }
            }
        };

        let _ = cancel_tx.send(());
        match retry.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "Retransmission failed after acknowledgement"),
            Err(e) => debug!(error = %e, "Retry task failed after acknowledgement"),
        }

        let stats = RetryStats {
            attempts: attempts.load(Ordering::SeqCst),
        };
        debug!(%destination, attempts = stats.attempts, "Request acknowledged");
        Ok((response, stats))
    }
}

/// Retransmit `bytes` on every tick until cancelled.
///
/// A dropped cancellation sender counts as cancellation, so abandoning the
/// caller's future also stops the retries.
async fn retry_loop(
    transport: Arc<SignedTransport>,
    bytes: Vec<u8>,
    destination: SocketAddr,
    interval: Duration,
    attempts: Arc<AtomicU32>,
    mut cancel: oneshot::Receiver<()>,
) -> Result<(), TransportError> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut cancel => return Ok(()),
            _ = ticker.tick() => {
                transport.send_bytes(&bytes, destination).await?;
                let sent = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if sent > 1 {
                    debug!(%destination, attempt = sent, "Retransmitting request");
                }
            }
        }
    }
}
