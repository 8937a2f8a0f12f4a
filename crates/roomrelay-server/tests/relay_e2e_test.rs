//! End-to-end tests against the production server over real TCP.
//!
//! Each test binds an ephemeral loopback port, drives the relay with scripted
//! clients and checks both what the clients see and the relay's own state.

use std::{net::SocketAddr, time::Duration};

use roomrelay_core::RoomCode;
use roomrelay_harness::RelayClient;
use roomrelay_proto::{ClientMessage, ServerMessage};
use roomrelay_server::{
    DriverConfig, NonMemberPolicy, Relay, Server, ServerError, ServerRuntimeConfig,
    ShutdownHandle, SystemEnv,
};
use serde_json::json;
use tokio::{net::TcpStream, task::JoinHandle};

const QUIET: Duration = Duration::from_millis(200);

struct TestServer {
    addr: SocketAddr,
    relay: Relay<SystemEnv>,
    shutdown: ShutdownHandle,
    task: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    async fn start(config: ServerRuntimeConfig) -> Self {
        let config = ServerRuntimeConfig { bind_address: "127.0.0.1:0".to_string(), ..config };
        let server = Server::bind(config).await.unwrap();

        let addr = server.local_addr().unwrap();
        let relay = server.relay().clone();
        let shutdown = server.shutdown_handle();
        let task = tokio::spawn(server.run());

        Self { addr, relay, shutdown, task }
    }

    async fn client(&self) -> RelayClient<TcpStream> {
        RelayClient::connect(self.addr).await.unwrap()
    }

    /// Wait for the relay to reach the expected connection and room counts.
    async fn settle(&self, connections: usize, rooms: usize) {
        let mut last = (usize::MAX, usize::MAX);
        for _ in 0..100 {
            last = self.relay.with_driver(|d| (d.connection_count(), d.room_count())).await;
            if last == (connections, rooms) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("relay never settled: expected {:?}, last saw {:?}", (connections, rooms), last);
    }

    async fn stop(self) {
        self.shutdown.trigger();
        let result = tokio::time::timeout(Duration::from_secs(5), self.task).await;
        assert!(matches!(result, Ok(Ok(Ok(())))), "server did not stop cleanly: {result:?}");
    }
}

fn with_capacity(capacity: usize) -> ServerRuntimeConfig {
    ServerRuntimeConfig {
        driver: DriverConfig { room_capacity: capacity, ..Default::default() },
        ..Default::default()
    }
}

#[tokio::test]
async fn two_person_conversation() {
    let server = TestServer::start(ServerRuntimeConfig::default()).await;
    let mut alice = server.client().await;
    let mut bob = server.client().await;

    let code = alice.create_room("Alice").await.unwrap();
    assert_eq!(code.len(), 6);
    assert!(code.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()));

    let joined = bob.join_room(&format!("  {}  ", code.to_lowercase()), "Bob").await.unwrap();
    assert_eq!(joined, ServerMessage::room_joined(code.as_str(), 2));
    assert_eq!(alice.recv().await.unwrap(), ServerMessage::user_joined("Bob", 2));

    // Chat reaches everyone, sender included, in the same order
    bob.chat("hello").await.unwrap();
    bob.chat("world").await.unwrap();
    for client in [&mut alice, &mut bob] {
        for expected in ["hello", "world"] {
            match client.recv().await.unwrap() {
                ServerMessage::ChatMessage { username, message, timestamp } => {
                    assert_eq!(username, "Bob");
                    assert_eq!(message, expected);
                    assert_eq!(timestamp.len(), 8);
                    assert_eq!(timestamp.matches(':').count(), 2);
                },
                other => panic!("expected chat_message, got {other:?}"),
            }
        }
    }

    // Signals reach everyone but the sender
    let signal = json!({"type": "offer", "sdp": "v=0"});
    alice
        .send(&ClientMessage::WebrtcSignal { signal: signal.clone(), target: json!("all") })
        .await
        .unwrap();
    match bob.recv().await.unwrap() {
        ServerMessage::WebrtcSignal { signal: got, target, sender } => {
            assert_eq!(got, signal);
            assert_eq!(target, json!("all"));
            assert_ne!(sender, 0);
        },
        other => panic!("expected webrtc_signal, got {other:?}"),
    }
    assert_eq!(alice.recv_timeout(QUIET).await.unwrap(), None);

    drop(bob);
    assert_eq!(alice.recv().await.unwrap(), ServerMessage::user_left("Bob", 1));
    server.settle(1, 1).await;

    drop(alice);
    server.settle(0, 0).await;

    server.stop().await;
}

#[tokio::test]
async fn unknown_room_is_refused() {
    let server = TestServer::start(ServerRuntimeConfig::default()).await;
    let mut alice = server.client().await;

    for code in ["ZZZZZZ", "abc", ""] {
        let reply = alice.join_room(code, "Alice").await.unwrap();
        assert_eq!(reply, ServerMessage::error(ServerMessage::ROOM_NOT_FOUND));
    }

    // Still usable afterwards
    let code = alice.create_room("Alice").await.unwrap();
    server.settle(1, 1).await;
    let room = RoomCode::parse(&code).unwrap();
    assert_eq!(server.relay.with_driver(|d| d.room_member_count(room)).await, 1);

    server.stop().await;
}

#[tokio::test]
async fn full_room_is_refused() {
    let server = TestServer::start(with_capacity(2)).await;
    let mut alice = server.client().await;
    let mut bob = server.client().await;
    let mut carol = server.client().await;

    let code = alice.create_room("Alice").await.unwrap();
    bob.join_room(&code, "Bob").await.unwrap();
    alice.recv_type("user_joined").await.unwrap();

    let reply = carol.join_room(&code, "Carol").await.unwrap();
    assert_eq!(reply, ServerMessage::error(ServerMessage::ROOM_FULL));
    assert_eq!(alice.recv_timeout(QUIET).await.unwrap(), None);
    assert_eq!(bob.recv_timeout(QUIET).await.unwrap(), None);

    // A seat frees up when someone leaves
    drop(bob);
    assert_eq!(alice.recv().await.unwrap(), ServerMessage::user_left("Bob", 1));
    let reply = carol.join_room(&code, "Carol").await.unwrap();
    assert_eq!(reply, ServerMessage::room_joined(code.as_str(), 2));

    server.stop().await;
}

#[tokio::test]
async fn concurrent_joins_never_exceed_capacity() {
    let server = TestServer::start(with_capacity(3)).await;
    let mut host = server.client().await;
    let code = host.create_room("Host").await.unwrap();

    let mut joiners = Vec::new();
    for i in 0..6 {
        let mut client = server.client().await;
        let code = code.clone();
        joiners.push(tokio::spawn(async move {
            let reply = client.join_room(&code, &format!("guest{i}")).await.unwrap();
            (client, reply)
        }));
    }

    let mut admitted = 0;
    let mut refused = 0;
    let mut clients = Vec::new();
    for joiner in joiners {
        let (client, reply) = joiner.await.unwrap();
        match reply {
            ServerMessage::RoomJoined { .. } => admitted += 1,
            ServerMessage::Error { message } if message == ServerMessage::ROOM_FULL => refused += 1,
            other => panic!("unexpected reply {other:?}"),
        }
        clients.push(client);
    }

    assert_eq!(admitted, 2);
    assert_eq!(refused, 4);
    let room = RoomCode::parse(&code).unwrap();
    assert_eq!(server.relay.with_driver(|d| d.room_member_count(room)).await, 3);

    server.stop().await;
}

#[tokio::test]
async fn switching_rooms_leaves_the_old_one() {
    let server = TestServer::start(ServerRuntimeConfig::default()).await;
    let mut alice = server.client().await;
    let mut bob = server.client().await;

    let first = alice.create_room("Alice").await.unwrap();
    bob.join_room(&first, "Bob").await.unwrap();
    alice.recv_type("user_joined").await.unwrap();

    let second = bob.create_room("Bob").await.unwrap();
    assert_ne!(first, second);
    assert_eq!(alice.recv().await.unwrap(), ServerMessage::user_left("Bob", 1));
    server.settle(2, 2).await;

    let reply = alice.join_room(&second, "Alice").await.unwrap();
    assert_eq!(reply, ServerMessage::room_joined(second.as_str(), 2));
    assert_eq!(bob.recv().await.unwrap(), ServerMessage::user_joined("Alice", 2));

    // Alice's old room emptied and closed
    server.settle(2, 1).await;
    assert_eq!(
        alice.join_room(&first, "Alice").await.unwrap(),
        ServerMessage::error(ServerMessage::ROOM_NOT_FOUND)
    );

    server.stop().await;
}

#[tokio::test]
async fn non_members_are_rejected_when_configured() {
    let config = ServerRuntimeConfig {
        driver: DriverConfig { non_member_policy: NonMemberPolicy::Reject, ..Default::default() },
        ..Default::default()
    };
    let server = TestServer::start(config).await;
    let mut alice = server.client().await;

    alice.chat("anyone?").await.unwrap();
    assert_eq!(alice.recv().await.unwrap(), ServerMessage::error(ServerMessage::NOT_IN_ROOM));

    server.stop().await;
}

#[tokio::test]
async fn non_members_are_ignored_by_default() {
    let server = TestServer::start(ServerRuntimeConfig::default()).await;
    let mut alice = server.client().await;

    alice.chat("anyone?").await.unwrap();
    assert_eq!(alice.recv_timeout(QUIET).await.unwrap(), None);

    server.stop().await;
}

#[tokio::test]
async fn oversized_document_is_dropped() {
    let config = ServerRuntimeConfig { max_message_size: 256, ..Default::default() };
    let server = TestServer::start(config).await;
    let mut alice = server.client().await;
    alice.create_room("Alice").await.unwrap();

    alice.chat(&"x".repeat(1000)).await.unwrap();
    alice.chat("short").await.unwrap();

    match alice.recv().await.unwrap() {
        ServerMessage::ChatMessage { message, .. } => assert_eq!(message, "short"),
        other => panic!("expected chat_message, got {other:?}"),
    }

    server.stop().await;
}

#[tokio::test]
async fn shutdown_closes_clients_and_stops_accepting() {
    let server = TestServer::start(ServerRuntimeConfig::default()).await;
    let mut alice = server.client().await;
    let mut bob = server.client().await;

    let code = alice.create_room("Alice").await.unwrap();
    bob.join_room(&code, "Bob").await.unwrap();
    server.settle(2, 1).await;

    let addr = server.addr;
    let relay = server.relay.clone();
    server.stop().await;

    assert!(alice.closed_within(Duration::from_secs(2)).await);
    assert!(bob.closed_within(Duration::from_secs(2)).await);
    assert_eq!(relay.with_driver(|d| (d.connection_count(), d.room_count())).await, (0, 0));

    assert!(TcpStream::connect(addr).await.is_err());
}
