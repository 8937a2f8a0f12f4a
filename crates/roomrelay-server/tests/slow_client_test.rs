//! Back-pressure and admission tests over in-memory pipes.
//!
//! `Relay::serve_connection` accepts any byte stream, so a client whose pipe
//! holds only a few bytes behaves exactly like a peer that stopped reading.

use std::{net::SocketAddr, time::Duration};

use roomrelay_core::RoomCode;
use roomrelay_harness::RelayClient;
use roomrelay_proto::ServerMessage;
use roomrelay_server::{DriverConfig, Relay, ServerError, ServerRuntimeConfig, SystemEnv};
use tokio::{io::DuplexStream, task::JoinHandle};

const ROOMY: usize = 64 * 1024;

fn peer() -> SocketAddr {
    "127.0.0.1:40000".parse().unwrap()
}

/// Serve one end of a fresh pipe and hand back the other end as a client.
fn attach(
    relay: &Relay<SystemEnv>,
    pipe_capacity: usize,
) -> (RelayClient<DuplexStream>, JoinHandle<Result<(), ServerError>>) {
    let (client_end, server_end) = tokio::io::duplex(pipe_capacity);
    let relay = relay.clone();
    let task = tokio::spawn(async move { relay.serve_connection(server_end, peer()).await });
    (RelayClient::new(client_end), task)
}

#[tokio::test]
async fn stuck_reader_is_evicted_and_others_keep_receiving() {
    let config = ServerRuntimeConfig {
        outbound_queue: 4,
        write_timeout: Duration::from_millis(300),
        ..Default::default()
    };
    let relay = Relay::new(SystemEnv::new(), &config);

    let (mut alice, _alice_task) = attach(&relay, ROOMY);
    let (mut stuck, stuck_task) = attach(&relay, 64);

    let code = alice.create_room("Alice").await.unwrap();
    stuck.join_room(&code, "Stuck").await.unwrap();
    assert_eq!(alice.recv().await.unwrap(), ServerMessage::user_joined("Stuck", 2));

    // `stuck` never reads again. Alice waits for each echo so her own queue
    // stays short.
    const CHATS: usize = 50;
    let mut chats = Vec::new();
    let mut departures = Vec::new();
    for i in 0..CHATS {
        alice.chat(&format!("message {i}")).await.unwrap();
        loop {
            match alice.recv_timeout(Duration::from_secs(5)).await.unwrap() {
                Some(ServerMessage::ChatMessage { message, .. }) => {
                    chats.push(message);
                    break;
                },
                Some(ServerMessage::UserLeft { username, users_count, .. }) => {
                    departures.push((username, users_count));
                },
                Some(other) => panic!("unexpected message {other:?}"),
                None => panic!("alice stalled after {} chats", chats.len()),
            }
        }
    }
    if departures.is_empty() {
        match alice.recv_timeout(Duration::from_secs(5)).await.unwrap() {
            Some(ServerMessage::UserLeft { username, users_count, .. }) => {
                departures.push((username, users_count));
            },
            other => panic!("expected user_left, got {other:?}"),
        }
    }

    let expected: Vec<String> = (0..CHATS).map(|i| format!("message {i}")).collect();
    assert_eq!(chats, expected);
    assert_eq!(departures, vec![("Stuck".to_string(), 1)]);

    // The stuck session's task finishes on its own
    let finished = tokio::time::timeout(Duration::from_secs(5), stuck_task).await;
    assert!(finished.is_ok(), "stuck session task never finished");

    let room = RoomCode::parse(&code).unwrap();
    let state = relay.with_driver(|d| (d.connection_count(), d.room_member_count(room))).await;
    assert_eq!(state, (1, 1));
    drop(stuck);
}

#[tokio::test]
async fn connections_beyond_the_limit_are_closed() {
    let config = ServerRuntimeConfig {
        driver: DriverConfig { max_connections: 1, ..Default::default() },
        ..Default::default()
    };
    let relay = Relay::new(SystemEnv::new(), &config);

    let (mut first, _first_task) = attach(&relay, ROOMY);
    first.create_room("First").await.unwrap();

    let (mut second, second_task) = attach(&relay, ROOMY);
    assert!(second.closed_within(Duration::from_secs(2)).await);
    let result = tokio::time::timeout(Duration::from_secs(2), second_task).await;
    assert!(matches!(result, Ok(Ok(Ok(())))));

    assert_eq!(relay.with_driver(|d| d.connection_count()).await, 1);

    // The first connection is unaffected
    first.chat("still here").await.unwrap();
    match first.recv().await.unwrap() {
        ServerMessage::ChatMessage { message, .. } => assert_eq!(message, "still here"),
        other => panic!("expected chat_message, got {other:?}"),
    }
}

#[tokio::test]
async fn connection_after_shutdown_is_closed() {
    let relay = Relay::new(SystemEnv::new(), &ServerRuntimeConfig::default());
    relay.shutdown_handle().trigger();

    let (mut late, task) = attach(&relay, ROOMY);
    assert!(late.closed_within(Duration::from_secs(2)).await);

    let result = tokio::time::timeout(Duration::from_secs(2), task).await;
    assert!(matches!(result, Ok(Ok(Ok(())))));
    assert_eq!(relay.with_driver(|d| d.connection_count()).await, 0);
}

#[tokio::test]
async fn close_all_sessions_signals_every_connection() {
    let relay = Relay::new(SystemEnv::new(), &ServerRuntimeConfig::default());

    let (mut alice, _a) = attach(&relay, ROOMY);
    let (mut bob, _b) = attach(&relay, ROOMY);
    let code = alice.create_room("Alice").await.unwrap();
    bob.join_room(&code, "Bob").await.unwrap();

    assert_eq!(relay.close_all_sessions().await, 2);
    assert!(alice.closed_within(Duration::from_secs(2)).await);
    assert!(bob.closed_within(Duration::from_secs(2)).await);

    for _ in 0..100 {
        if relay.with_driver(|d| d.connection_count()).await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(relay.with_driver(|d| (d.connection_count(), d.room_count())).await, (0, 0));
}
