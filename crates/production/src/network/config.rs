//! Transport configuration types.

use std::time::Duration;

/// Largest payload a single UDP datagram can carry over IPv4.
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// Configuration for the signed UDP transport.
///
/// # Example
///
/// ```
/// use tessera_production::network::TransportConfig;
/// use std::time::Duration;
///
/// let config = TransportConfig::default()
///     .with_retry_interval(Duration::from_millis(250))
///     .with_max_datagram_size(4096);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Receive buffer size. Longer datagrams are truncated and fail to decode.
    ///
    /// Default: 65507 bytes
    pub max_datagram_size: usize,

    /// Delay between retransmissions of an unacknowledged request.
    ///
    /// Default: 100ms
    pub retry_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_datagram_size: MAX_UDP_PAYLOAD,
            retry_interval: Duration::from_millis(100),
        }
    }
}

impl TransportConfig {
    /// Set the receive buffer size.
    pub fn with_max_datagram_size(mut self, size: usize) -> Self {
        self.max_datagram_size = size;
        self
    }

    /// Set the retransmission interval.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Short retry interval for local tests.
    pub fn for_testing() -> Self {
        Self {
            max_datagram_size: MAX_UDP_PAYLOAD,
            retry_interval: Duration::from_millis(20),
        }
    }
}
