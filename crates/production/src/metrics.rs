//! Node metrics using native Prometheus client.
//!
//! Metrics are domain-specific rather than generic event counters.
//! Use traces for event-level granularity during investigations.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Gauge, Histogram,
};
use std::sync::OnceLock;

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Domain-specific metrics for node monitoring.
pub struct Metrics {
    // === Requests ===
    pub requests_received: CounterVec,
    pub duplicate_requests: Counter,
    pub responses_sent: Counter,
    pub request_latency: Histogram,

    // === Consensus ===
    pub consensus_started: Counter,
    pub certificates_formed: Counter,
    pub conflicting_votes: Counter,
    pub ledger_length: Gauge,

    // === Errors ===
    pub authentication_failures: Counter,
    pub malformed_requests: Counter,
    pub send_failures: Counter,
}

impl Metrics {
    fn new() -> Self {
        // Latency buckets: 1ms to 60s
        let latency_buckets = vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
        ];

        Self {
            // Requests
            requests_received: register_counter_vec!(
                "tessera_requests_received_total",
                "Total authenticated client requests received",
                &["kind"]
            )
            .unwrap(),

            duplicate_requests: register_counter!(
                "tessera_duplicate_requests_total",
                "Client requests ignored as retransmissions"
            )
            .unwrap(),

            responses_sent: register_counter!(
                "tessera_responses_sent_total",
                "Total responses sent to clients"
            )
            .unwrap(),

            request_latency: register_histogram!(
                "tessera_request_latency_seconds",
                "Time from accepting a request to its finalized response",
                latency_buckets
            )
            .unwrap(),

            // Consensus
            consensus_started: register_counter!(
                "tessera_consensus_started_total",
                "Consensus instances started on behalf of clients"
            )
            .unwrap(),

            certificates_formed: register_counter!(
                "tessera_certificates_formed_total",
                "Quorum certificates formed"
            )
            .unwrap(),

            conflicting_votes: register_counter!(
                "tessera_conflicting_votes_total",
                "Votes that disagreed with a certified value"
            )
            .unwrap(),

            ledger_length: register_gauge!(
                "tessera_ledger_length",
                "Number of finalized ledger entries"
            )
            .unwrap(),

            // Errors
            authentication_failures: register_counter!(
                "tessera_authentication_failures_total",
                "Datagrams dropped for failing signature verification"
            )
            .unwrap(),

            malformed_requests: register_counter!(
                "tessera_malformed_requests_total",
                "Datagrams dropped as undecodable or unrecognized"
            )
            .unwrap(),

            send_failures: register_counter!(
                "tessera_send_failures_total",
                "Responses that could not be sent"
            )
            .unwrap(),
        }
    }
}

/// Get or initialize the global metrics instance.
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

/// Record an authenticated request of the given kind (`"append"` or `"read"`).
pub fn record_request_received(kind: &str) {
    debug_assert!(
        matches!(kind, "append" | "read"),
        "Unknown request kind: {} - add to allowed list",
        kind
    );
    metrics()
        .requests_received
        .with_label_values(&[kind])
        .inc();
}

/// Record a retransmitted request that was not processed again.
pub fn record_duplicate_request() {
    metrics().duplicate_requests.inc();
}

/// Record a consensus instance started for a request.
pub fn record_consensus_started() {
    metrics().consensus_started.inc();
}

/// Record a response sent and the time the request took.
pub fn record_response_sent(latency_secs: f64) {
    let m = metrics();
    m.responses_sent.inc();
    m.request_latency.observe(latency_secs);
}

/// Record a certificate and the conflicting votes found alongside it.
pub fn record_certificate(conflicts: usize) {
    let m = metrics();
    m.certificates_formed.inc();
    m.conflicting_votes.inc_by(conflicts as f64);
}

/// Update the finalized ledger length.
pub fn set_ledger_length(length: usize) {
    metrics().ledger_length.set(length as f64);
}

/// Record a datagram that failed authentication.
pub fn record_authentication_failure() {
    metrics().authentication_failures.inc();
}

/// Record a malformed datagram.
pub fn record_malformed_request() {
    metrics().malformed_requests.inc();
}

/// Record a response that could not be sent.
pub fn record_send_failure() {
    metrics().send_failures.inc();
}
