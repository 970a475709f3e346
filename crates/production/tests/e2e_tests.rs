//! End-to-end tests for the ledger service.
//!
//! These tests run a [`LedgerService`] over real localhost UDP sockets, with
//! the in-process consensus driver deciding each instance. Every socket binds
//! an ephemeral port, so tests can run in parallel.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tessera_bft::{ConsensusDriver, LocalConsensus};
use tessera_production::network::{
    decode_datagram, ReliableSender, SignedTransport, TransportConfig,
};
use tessera_production::{ClientDirectory, LedgerService, ServiceConfig, ServiceHandle};
use tessera_types::test_utils::{test_cluster, test_keypair};
use tessera_types::{ClientId, ClientRequest, ClientResponse, KeyPair, NodeId, PublicKey};
use tokio::time::timeout;

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);
const SILENCE: Duration = Duration::from_millis(300);

fn localhost() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn client_key(index: u8) -> KeyPair {
    test_keypair(100 + index)
}

fn client_id(index: u8) -> ClientId {
    ClientId::new(format!("client-{index}"))
}

/// A running node plus handles for inspecting it.
struct TestNode {
    driver: Arc<LocalConsensus>,
    handle: ServiceHandle,
    public_key: PublicKey,
}

impl TestNode {
    async fn start(config: ServiceConfig, faulty: &[&str]) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let (cluster, keys) = test_cluster(4);
        let driver = Arc::new(
            LocalConsensus::from_cluster(NodeId::new("1"), &cluster)
                .with_faulty(faulty.iter().map(|id| NodeId::new(*id))),
        );
        let clients: ClientDirectory = (1..=3)
            .map(|i| (client_id(i), client_key(i).public_key()))
            .collect();

        let service = Arc::new(LedgerService::new(driver.clone(), clients, config));
        let keypair = keys[0].clone();
        let public_key = keypair.public_key();
        let handle = service.listen(localhost(), keypair).await.unwrap();

        Self {
            driver,
            handle,
            public_key,
        }
    }

    fn addr(&self) -> SocketAddr {
        self.handle.local_addr()
    }
}

async fn client_transport(index: u8) -> Arc<SignedTransport> {
    Arc::new(
        SignedTransport::bind(localhost(), client_key(index), TransportConfig::for_testing())
            .await
            .unwrap(),
    )
}

/// Wait for one authenticated response, or `None` after `wait`.
async fn recv_response(
    transport: &SignedTransport,
    node_key: &PublicKey,
    wait: Duration,
) -> Option<ClientResponse> {
    timeout(wait, async {
        loop {
            let (bytes, _) = transport.recv().await.unwrap();
            if let Ok(response) = decode_datagram::<ClientResponse>(&bytes, node_key) {
                return response;
            }
        }
    })
    .await
    .ok()
}

// ============================================================================
// Request Flow
// ============================================================================

#[tokio::test]
async fn test_append_is_finalized_and_returned() {
    let node = TestNode::start(ServiceConfig::default(), &[]).await;
    let sender = ReliableSender::new(client_transport(1).await);

    let request = ClientRequest::append(client_id(1), 1, "hello", 0);
    let (response, stats) = timeout(
        RESPONSE_TIMEOUT,
        sender.send_until_acknowledged(
            &request,
            node.addr(),
            &node.public_key,
            |r: &ClientResponse| r.covers(0),
        ),
    )
    .await
    .expect("no response")
    .unwrap();

    assert_eq!(
        response,
        ClientResponse {
            finalized_instance: 1,
            ledger_suffix: vec!["hello".into()],
        }
    );
    assert!(stats.attempts >= 1);
    assert_eq!(node.driver.ledger().values(), vec!["hello"]);
}

#[tokio::test]
async fn test_sequential_requests_return_unseen_suffix() {
    let node = TestNode::start(ServiceConfig::default(), &[]).await;
    let sender = ReliableSender::new(client_transport(1).await);

    let mut known: Vec<String> = Vec::new();
    for (seq, value) in [(1, "a"), (2, "b"), (3, "c")] {
        let request = ClientRequest::append(client_id(1), seq, value, known.len());
        let known_len = known.len();
        let (response, _) = timeout(
            RESPONSE_TIMEOUT,
            sender.send_until_acknowledged(
                &request,
                node.addr(),
                &node.public_key,
                move |r: &ClientResponse| r.covers(known_len),
            ),
        )
        .await
        .expect("no response")
        .unwrap();

        assert_eq!(response.finalized_instance, seq);
        assert_eq!(response.ledger_suffix, vec![value.to_string()]);
        known.extend(response.ledger_suffix);
    }
    assert_eq!(known, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_concurrent_clients() {
    let node = TestNode::start(ServiceConfig::default(), &[]).await;

    let mut calls = Vec::new();
    for i in 1..=3u8 {
        let sender = ReliableSender::new(client_transport(i).await);
        let addr = node.addr();
        let key = node.public_key;
        calls.push(tokio::spawn(async move {
            let request = ClientRequest::append(client_id(i), 1, format!("v{i}"), 0);
            sender
                .send_until_acknowledged(&request, addr, &key, |r: &ClientResponse| r.covers(0))
                .await
                .unwrap()
                .0
        }));
    }

    let mut instances = Vec::new();
    for call in calls {
        let response = timeout(RESPONSE_TIMEOUT, call).await.unwrap().unwrap();
        assert!(response.covers(0));
        instances.push(response.finalized_instance);
    }
    instances.sort_unstable();
    assert_eq!(instances, vec![1, 2, 3]);
    assert_eq!(node.driver.ledger().len(), 3);
}

#[tokio::test]
async fn test_read_returns_ledger() {
    let node = TestNode::start(ServiceConfig::default(), &[]).await;
    let transport = client_transport(1).await;

    transport
        .send(&ClientRequest::append(client_id(1), 1, "a", 0), node.addr())
        .await
        .unwrap();
    recv_response(&transport, &node.public_key, RESPONSE_TIMEOUT)
        .await
        .expect("append response");

    transport
        .send(&ClientRequest::read(client_id(1), 2, 0), node.addr())
        .await
        .unwrap();
    let response = recv_response(&transport, &node.public_key, RESPONSE_TIMEOUT)
        .await
        .expect("read response");
    assert_eq!(response.finalized_instance, 2);
    assert_eq!(response.ledger_suffix, vec!["a", ""]);
}

// ============================================================================
// Deduplication
// ============================================================================

#[tokio::test]
async fn test_duplicate_request_gets_no_second_reply() {
    let node = TestNode::start(ServiceConfig::default(), &[]).await;
    let transport = client_transport(1).await;
    let request = ClientRequest::append(client_id(1), 1, "hello", 0);

    transport.send(&request, node.addr()).await.unwrap();
    let first = recv_response(&transport, &node.public_key, RESPONSE_TIMEOUT).await;
    assert_eq!(first.map(|r| r.finalized_instance), Some(1));

    transport.send(&request, node.addr()).await.unwrap();
    assert_eq!(
        recv_response(&transport, &node.public_key, SILENCE).await,
        None
    );
    assert_eq!(node.driver.ledger().len(), 1);
    assert_eq!(node.driver.bucket().vote_count(2, 1), 0);
}

#[tokio::test]
async fn test_duplicate_request_replayed_when_enabled() {
    let node = TestNode::start(ServiceConfig::default().with_replay_completed(true), &[]).await;
    let transport = client_transport(1).await;
    let request = ClientRequest::append(client_id(1), 1, "hello", 0);

    transport.send(&request, node.addr()).await.unwrap();
    let first = recv_response(&transport, &node.public_key, RESPONSE_TIMEOUT)
        .await
        .unwrap();

    transport.send(&request, node.addr()).await.unwrap();
    let replay = recv_response(&transport, &node.public_key, RESPONSE_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(first, replay);
    assert_eq!(node.driver.ledger().len(), 1);
}

// ============================================================================
// Faults
// ============================================================================

#[tokio::test]
async fn test_bad_datagrams_do_not_stop_the_service() {
    let node = TestNode::start(ServiceConfig::default(), &[]).await;
    let transport = client_transport(1).await;

    // Garbage, an unknown request kind and a request from an unknown client
    transport.send_bytes(b"\xff\xfe", node.addr()).await.unwrap();
    transport
        .send(&serde_json::json!({"type": "DELETE"}), node.addr())
        .await
        .unwrap();
    transport
        .send(&ClientRequest::append(client_id(9), 1, "x", 0), node.addr())
        .await
        .unwrap();
    assert_eq!(
        recv_response(&transport, &node.public_key, SILENCE).await,
        None
    );

    transport
        .send(&ClientRequest::append(client_id(1), 1, "ok", 0), node.addr())
        .await
        .unwrap();
    let response = recv_response(&transport, &node.public_key, RESPONSE_TIMEOUT).await;
    assert_eq!(response.map(|r| r.ledger_suffix), Some(vec!["ok".to_string()]));
}

#[tokio::test]
async fn test_impersonated_client_is_dropped() {
    let node = TestNode::start(ServiceConfig::default(), &[]).await;
    // Client 2's socket claiming to be client 1
    let impostor = client_transport(2).await;

    impostor
        .send(&ClientRequest::append(client_id(1), 1, "forged", 0), node.addr())
        .await
        .unwrap();
    assert_eq!(
        recv_response(&impostor, &node.public_key, SILENCE).await,
        None
    );
    assert!(node.driver.ledger().is_empty());
}

#[tokio::test]
async fn test_tolerates_one_faulty_member() {
    let node = TestNode::start(ServiceConfig::default(), &["4"]).await;
    let sender = ReliableSender::new(client_transport(1).await);

    let request = ClientRequest::append(client_id(1), 1, "X", 0);
    let (response, _) = timeout(
        RESPONSE_TIMEOUT,
        sender.send_until_acknowledged(
            &request,
            node.addr(),
            &node.public_key,
            |r: &ClientResponse| r.covers(0),
        ),
    )
    .await
    .expect("no response")
    .unwrap();

    assert_eq!(response.ledger_suffix, vec!["X"]);
    assert_eq!(
        node.driver.bucket().detect_conflicts("X", 1, 1),
        vec![NodeId::new("4")]
    );
}

#[tokio::test]
async fn test_stopped_service_stops_answering() {
    let node = TestNode::start(ServiceConfig::default(), &[]).await;
    let addr = node.addr();
    let key = node.public_key;
    node.handle.stop().await;

    let transport = client_transport(1).await;
    // The port may be closed, in which case the send itself can fail later
    let _ = transport
        .send(&ClientRequest::append(client_id(1), 1, "late", 0), addr)
        .await;
    assert_eq!(recv_response_lenient(&transport, &key, SILENCE).await, None);
    assert!(node.driver.ledger().is_empty());
}

/// Like [`recv_response`], tolerating ICMP-induced receive errors.
async fn recv_response_lenient(
    transport: &SignedTransport,
    node_key: &PublicKey,
    wait: Duration,
) -> Option<ClientResponse> {
    timeout(wait, async {
        loop {
            if let Ok((bytes, _)) = transport.recv().await {
                if let Ok(response) = decode_datagram::<ClientResponse>(&bytes, node_key) {
                    return response;
                }
            }
        }
    })
    .await
    .ok()
}
