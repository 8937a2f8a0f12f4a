//! Fuzz target for ServerDriver room bookkeeping
//!
//! Prevent membership desync between the registry and the room table
//! (HIGH priority)
//!
//! # Strategy
//!
//! - Arbitrary interleavings of connects, creates, joins (valid, stale,
//!   malformed and lowercased codes), chats, signals and closes
//! - Events for sessions that were never accepted or already closed
//! - Tiny room capacities so the full-room path is hit constantly
//!
//! # Invariants
//!
//! - Every open room has between 1 and `capacity` members
//! - Every session in a room points at an open room
//! - Broadcasts only ever target open rooms
//! - Closing every session closes every room
//! - The driver NEVER panics

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use roomrelay_core::RoomCode;
use roomrelay_proto::{ClientMessage, ServerMessage};
use roomrelay_server::{DriverConfig, ServerAction, ServerDriver, ServerEvent, SystemEnv};

#[derive(Debug, Arbitrary)]
struct Scenario {
    capacity: u8,
    ops: Vec<Op>,
}

#[derive(Debug, Arbitrary)]
enum Op {
    Connect(u8),
    Create { session: u8, username: Option<String> },
    Join { session: u8, code: CodeChoice, username: Option<String> },
    Chat { session: u8, text: String },
    Signal(u8),
    Close(u8),
}

#[derive(Debug, Arbitrary)]
enum CodeChoice {
    Issued(u8),
    IssuedLowercase(u8),
    Raw(String),
}

fuzz_target!(|scenario: Scenario| {
    let capacity = usize::from(scenario.capacity % 8).max(1);
    let config = DriverConfig { room_capacity: capacity, ..Default::default() };
    let mut driver = ServerDriver::new(SystemEnv::new(), config);
    let mut issued: Vec<RoomCode> = Vec::new();

    for op in scenario.ops.into_iter().take(256) {
        let event = match op {
            Op::Connect(s) => ServerEvent::ConnectionAccepted { session_id: session(s) },
            Op::Create { session: s, username } => ServerEvent::MessageReceived {
                session_id: session(s),
                message: ClientMessage::CreateRoom { username },
            },
            Op::Join { session: s, code, username } => {
                let room_code = match code {
                    CodeChoice::Issued(i) if !issued.is_empty() => {
                        issued[usize::from(i) % issued.len()].to_string()
                    },
                    CodeChoice::IssuedLowercase(i) if !issued.is_empty() => {
                        issued[usize::from(i) % issued.len()].to_string().to_lowercase()
                    },
                    CodeChoice::Raw(raw) => raw,
                    _ => String::new(),
                };
                ServerEvent::MessageReceived {
                    session_id: session(s),
                    message: ClientMessage::JoinRoom { room_code, username },
                }
            },
            Op::Chat { session: s, text } => ServerEvent::MessageReceived {
                session_id: session(s),
                message: ClientMessage::ChatMessage { message: text },
            },
            Op::Signal(s) => ServerEvent::MessageReceived {
                session_id: session(s),
                message: ClientMessage::WebrtcSignal {
                    signal: serde_json::json!({"type": "candidate"}),
                    target: serde_json::Value::Null,
                },
            },
            Op::Close(s) => ServerEvent::ConnectionClosed {
                session_id: session(s),
                reason: "fuzz".to_string(),
            },
        };

        // Unknown or duplicate sessions are errors, never panics
        let Ok(actions) = driver.process_event(event) else {
            continue;
        };

        for action in &actions {
            match action {
                ServerAction::SendToSession {
                    message: ServerMessage::RoomCreated { room_code, .. },
                    ..
                } => {
                    let code = RoomCode::parse(room_code).expect("issued codes must parse");
                    issued.push(code);
                },
                ServerAction::BroadcastToRoom { room_code, .. } => {
                    // Departures are announced only while someone remains
                    assert!(driver.has_room(*room_code), "broadcast to closed room {room_code}");
                },
                _ => {},
            }
        }

        check_invariants(&driver, capacity);
    }

    let sessions: Vec<u64> = driver.session_ids().collect();
    for session_id in sessions {
        let _ = driver.process_event(ServerEvent::ConnectionClosed {
            session_id,
            reason: "teardown".to_string(),
        });
    }
    assert_eq!(driver.connection_count(), 0);
    assert_eq!(driver.room_count(), 0);
});

fn session(raw: u8) -> u64 {
    u64::from(raw % 16) + 1
}

fn check_invariants(driver: &ServerDriver<SystemEnv>, capacity: usize) {
    for code in driver.room_codes() {
        let members = driver.room_member_count(code);
        assert!(members >= 1, "room {code} open with no members");
        assert!(members <= capacity, "room {code} holds {members} > {capacity}");
    }

    for session_id in driver.session_ids() {
        if let Some(code) = driver.session_room(session_id) {
            assert!(driver.has_room(code), "session {session_id} in closed room {code}");
        }
    }
}
