//! Client sessions against an in-process ledger service.

use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tessera_bft::{ConsensusDriver, LocalConsensus};
use tessera_client::{visible_values, ClientConfig, ClientError, LedgerClient};
use tessera_production::network::{decode_datagram, SignedTransport, TransportConfig};
use tessera_production::{ClientDirectory, LedgerService, ServiceConfig, ServiceHandle};
use tessera_types::test_utils::{test_cluster, test_keypair};
use tessera_types::{
    ClientId, ClientRequest, ClientResponse, ClusterConfig, ClusterError, KeyPair, NodeId,
    PublicKey,
};
use tokio::time::timeout;
use tracing_test::traced_test;

const CALL_TIMEOUT: Duration = Duration::from_secs(5);

struct Leader {
    driver: Arc<LocalConsensus>,
    handle: ServiceHandle,
    public_key: PublicKey,
    cluster: ClusterConfig,
}

async fn start_leader_with(config: ServiceConfig) -> Leader {
    let (cluster, keys) = test_cluster(4);
    let driver = Arc::new(LocalConsensus::from_cluster(NodeId::new("1"), &cluster));
    let clients: ClientDirectory = (1..=2u8)
        .map(|i| (client_id(i), test_keypair(100 + i).public_key()))
        .collect();
    let service = Arc::new(LedgerService::new(
        driver.clone(),
        clients,
        config,
    ));
    let keypair = keys[0].clone();
    let public_key = keypair.public_key();
    let handle = service
        .listen("127.0.0.1:0".parse().unwrap(), keypair)
        .await
        .unwrap();

    Leader {
        driver,
        handle,
        public_key,
        cluster,
    }
}

async fn start_leader() -> Leader {
    start_leader_with(ServiceConfig::default()).await
}

fn client_id(index: u8) -> ClientId {
    ClientId::new(format!("client-{index}"))
}

async fn client(leader: &Leader, index: u8) -> LedgerClient {
    LedgerClient::new(
        client_id(index),
        test_keypair(100 + index),
        leader.handle.local_addr(),
        leader.public_key,
        TransportConfig::for_testing(),
    )
    .await
    .unwrap()
}

#[tokio::test]
#[traced_test]
async fn test_append_then_read() {
    let leader = start_leader().await;
    let mut client = client(&leader, 1).await;
    assert_eq!(client.next_seq(), 1);

    let learned = timeout(CALL_TIMEOUT, client.append("hello"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(learned, vec!["hello"]);
    assert_eq!(client.next_seq(), 2);

    let learned = timeout(CALL_TIMEOUT, client.read())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(learned, vec![""]);
    assert_eq!(client.ledger(), ["hello", ""]);
    assert_eq!(visible_values(client.ledger()), vec!["hello"]);
    assert_eq!(leader.driver.ledger().len(), 2);
}

#[tokio::test]
#[traced_test]
async fn test_clients_learn_each_others_values() {
    let leader = start_leader().await;
    let mut alice = client(&leader, 1).await;
    let mut bob = client(&leader, 2).await;

    timeout(CALL_TIMEOUT, alice.append("a1"))
        .await
        .unwrap()
        .unwrap();
    timeout(CALL_TIMEOUT, alice.append("a2"))
        .await
        .unwrap()
        .unwrap();

    // Bob has seen nothing yet, so his first answer carries the whole ledger
    let learned = timeout(CALL_TIMEOUT, bob.append("b1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(learned, vec!["a1", "a2", "b1"]);

    let learned = timeout(CALL_TIMEOUT, alice.read())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(learned, vec!["b1", ""]);
    assert_eq!(alice.ledger(), ["a1", "a2", "b1", ""]);
}

#[tokio::test]
#[traced_test]
async fn test_first_seq_override() {
    let leader = start_leader().await;
    let mut client = client(&leader, 1).await.with_first_seq(40);
    assert_eq!(client.next_seq(), 40);

    timeout(CALL_TIMEOUT, client.append("x"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(client.next_seq(), 41);
}

#[tokio::test]
#[traced_test]
async fn test_connect_from_config_files() {
    let leader = start_leader().await;
    let dir = tempfile::tempdir().unwrap();

    // Point the leader entry at the port the service actually bound
    let port = leader.handle.local_addr().port();
    let members = leader
        .cluster
        .members()
        .iter()
        .cloned()
        .map(|mut member| {
            if member.leader {
                member.client_port = port;
            }
            member
        })
        .collect();
    fs::write(
        dir.path().join("cluster.toml"),
        toml::to_string(&ClusterConfig::new(members)).unwrap(),
    )
    .unwrap();
    fs::write(dir.path().join("client1.key"), test_keypair(101).seed_hex()).unwrap();
    fs::write(
        dir.path().join("client.toml"),
        "id = \"client-1\"\nkey_path = \"client1.key\"\ncluster_path = \"cluster.toml\"\nretry_interval_ms = 20\n",
    )
    .unwrap();

    let config = ClientConfig::load(dir.path().join("client.toml")).unwrap();
    let mut client = LedgerClient::connect(&config).await.unwrap();
    assert_eq!(client.id(), &client_id(1));

    let learned = timeout(CALL_TIMEOUT, client.append("via-config"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(learned, vec!["via-config"]);
}

#[tokio::test]
async fn test_connect_without_leader() {
    let dir = tempfile::tempdir().unwrap();
    let (cluster, _) = test_cluster(4);
    let members = cluster
        .members()
        .iter()
        .cloned()
        .map(|mut member| {
            member.leader = false;
            member
        })
        .collect();
    fs::write(
        dir.path().join("cluster.toml"),
        toml::to_string(&ClusterConfig::new(members)).unwrap(),
    )
    .unwrap();
    fs::write(dir.path().join("client.key"), KeyPair::generate().seed_hex()).unwrap();
    fs::write(
        dir.path().join("client.toml"),
        "id = \"client-1\"\nkey_path = \"client.key\"\ncluster_path = \"cluster.toml\"\n",
    )
    .unwrap();

    let config = ClientConfig::load(dir.path().join("client.toml")).unwrap();
    assert!(matches!(
        LedgerClient::connect(&config).await,
        Err(ClientError::Cluster(ClusterError::MissingLeader))
    ));
}

#[tokio::test]
async fn test_unanswered_request_keeps_retrying() {
    // This socket never answers, so the call never completes
    let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = silent.local_addr().unwrap();
    let mut client = LedgerClient::new(
        client_id(1),
        test_keypair(101),
        addr,
        test_keypair(1).public_key(),
        TransportConfig::for_testing(),
    )
    .await
    .unwrap();

    assert!(timeout(Duration::from_millis(200), client.append("lost"))
        .await
        .is_err());

    let mut buf = [0u8; 65_507];
    let mut received = 0;
    while timeout(Duration::from_millis(50), silent.recv_from(&mut buf))
        .await
        .is_ok()
    {
        received += 1;
    }
    assert!(received >= 2, "expected retransmissions, got {received}");
    assert!(client.ledger().is_empty());
}

#[tokio::test]
#[traced_test]
async fn test_earlier_reply_is_not_taken_for_the_next_one() {
    // A leader that answers the second request with the first reply before
    // the real one
    let leader = Arc::new(
        SignedTransport::bind(
            "127.0.0.1:0".parse().unwrap(),
            test_keypair(1),
            TransportConfig::for_testing(),
        )
        .await
        .unwrap(),
    );
    let client_key = test_keypair(101).public_key();
    let first = ClientResponse {
        finalized_instance: 1,
        ledger_suffix: vec!["a".into()],
    };
    let second = ClientResponse {
        finalized_instance: 2,
        ledger_suffix: vec!["b".into()],
    };

    let responder = {
        let leader = leader.clone();
        tokio::spawn(async move {
            loop {
                let (bytes, source) = leader.recv().await.unwrap();
                let Ok(request) = decode_datagram::<ClientRequest>(&bytes, &client_key) else {
                    continue;
                };
                if request.client_seq == 1 {
                    leader.send(&first, source).await.unwrap();
                } else {
                    leader.send(&first, source).await.unwrap();
                    leader.send(&second, source).await.unwrap();
                }
            }
        })
    };

    let mut client = LedgerClient::new(
        client_id(1),
        test_keypair(101),
        leader.local_addr().unwrap(),
        test_keypair(1).public_key(),
        TransportConfig::for_testing(),
    )
    .await
    .unwrap();

    let learned = timeout(CALL_TIMEOUT, client.append("a"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(learned, vec!["a"]);

    let learned = timeout(CALL_TIMEOUT, client.append("b"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(learned, vec!["b"]);
    assert_eq!(client.ledger(), ["a", "b"]);
    responder.abort();
}

#[tokio::test]
#[traced_test]
async fn test_replayed_replies_keep_ledger_consistent() {
    let leader = start_leader_with(ServiceConfig::default().with_replay_completed(true)).await;
    // Retransmit aggressively so replays of finished requests are in flight
    // while the next call waits
    let mut client = LedgerClient::new(
        client_id(1),
        test_keypair(101),
        leader.handle.local_addr(),
        leader.public_key,
        TransportConfig::for_testing().with_retry_interval(Duration::from_millis(1)),
    )
    .await
    .unwrap();

    let values: Vec<String> = (0..5).map(|i| format!("v{i}")).collect();
    for value in &values {
        let learned = timeout(CALL_TIMEOUT, client.append(value.clone()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(learned, vec![value.clone()]);
    }
    assert_eq!(client.ledger(), values.as_slice());
    assert_eq!(leader.driver.ledger().values(), values);
}
