//! Server driver.
//!
//! Ties together the RoomManager (open rooms, code allocation, capacity) and
//! the ConnectionRegistry (display names, session-to-room mapping). Events go
//! in, actions come out; sockets, queues and timers belong to the runtime.
//!
//! Every client-visible failure (unknown room, full room, exhausted code
//! space) becomes an `error` reply to the requesting session and leaves all
//! state untouched. `Err` is reserved for runtime bugs such as events for
//! sessions that were never accepted.

use roomrelay_core::{Environment, RoomCode};
use roomrelay_proto::{ClientMessage, ServerMessage};
use serde_json::Value;

use crate::{
    driver_error::DriverError,
    registry::{ConnectionRegistry, SessionInfo},
    room_manager::{DEFAULT_ROOM_CAPACITY, RoomError, RoomManager},
};

/// Longest display name kept, in characters. Longer names are truncated.
pub const MAX_NAME_CHARS: usize = 32;

/// What to do with chat and signal messages from sessions outside any room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NonMemberPolicy {
    /// Drop the message silently
    #[default]
    Ignore,
    /// Reply with a `not in a room` error
    Reject,
}

/// Driver configuration
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Maximum members per room
    pub room_capacity: usize,
    /// Handling of membership-only messages from non-members
    pub non_member_policy: NonMemberPolicy,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            room_capacity: DEFAULT_ROOM_CAPACITY,
            non_member_policy: NonMemberPolicy::default(),
        }
    }
}

/// Events that the server driver processes.
///
/// These are produced by the external runtime (simulation or production).
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A new connection was accepted
    ConnectionAccepted {
        /// Unique connection ID assigned by the runtime
        session_id: u64,
    },

    /// A complete message was decoded from a connection
    MessageReceived {
        /// Connection that sent the message
        session_id: u64,
        /// The decoded message
        message: ClientMessage,
    },

    /// A connection was closed (by peer, error, eviction or shutdown)
    ConnectionClosed {
        /// Connection that was closed
        session_id: u64,
        /// Reason for closure
        reason: String,
    },
}

/// Actions that the server driver produces.
///
/// These are executed by runtime-specific code (production or simulation).
/// Generic over `I` (Instant type) to support virtual time in tests.
#[derive(Debug, Clone)]
pub enum ServerAction<I = std::time::Instant> {
    /// Send a message to a specific session
    SendToSession {
        /// Target session ID
        session_id: u64,
        /// Message to send
        message: ServerMessage,
    },

    /// Send a message to every member of a room
    ///
    /// Recipients are the room's members at the time the action is executed.
    BroadcastToRoom {
        /// Target room
        room_code: RoomCode,
        /// Message to broadcast
        message: ServerMessage,
        /// Optional session to exclude from broadcast
        exclude_session: Option<u64>,
    },

    /// Close a connection
    CloseConnection {
        /// Session to close
        session_id: u64,
        /// Reason for closure
        reason: String,
    },

    /// Log a message (for debugging/monitoring)
    Log {
        /// Log level
        level: LogLevel,
        /// Message to log
        message: String,
        /// When the event occurred
        timestamp: I,
    },
}

/// Log levels for server actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// Informational message
    Info,
    /// Warning
    Warn,
    /// Error
    Error,
}

/// Action-based relay driver.
///
/// Orchestrates session lifecycle, room membership and message routing.
pub struct ServerDriver<E: Environment> {
    /// Session/room registry
    registry: ConnectionRegistry,
    /// Open rooms
    room_manager: RoomManager<E::Instant>,
    /// Environment (time, RNG)
    env: E,
    /// Driver configuration
    config: DriverConfig,
}

impl<E: Environment> ServerDriver<E> {
    /// Create a new server driver.
    pub fn new(env: E, config: DriverConfig) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            room_manager: RoomManager::with_capacity(config.room_capacity),
            env,
            config,
        }
    }

    /// Process a server event and return actions to execute.
    ///
    /// This is the main entry point for the server driver.
    pub fn process_event(
        &mut self,
        event: ServerEvent,
    ) -> Result<Vec<ServerAction<E::Instant>>, DriverError> {
        match event {
            ServerEvent::ConnectionAccepted { session_id } => {
                self.handle_connection_accepted(session_id)
            },
            ServerEvent::MessageReceived { session_id, message } => {
                self.handle_message_received(session_id, message)
            },
            ServerEvent::ConnectionClosed { session_id, reason } => {
                Ok(self.handle_connection_closed(session_id, &reason))
            },
        }
    }

    /// Handle a new connection being accepted.
    fn handle_connection_accepted(
        &mut self,
        session_id: u64,
    ) -> Result<Vec<ServerAction<E::Instant>>, DriverError> {
        let now = self.env.now();

        if self.registry.has_session(session_id) {
            return Err(DriverError::SessionAlreadyExists(session_id));
        }

        if self.registry.session_count() >= self.config.max_connections {
            return Ok(vec![
                ServerAction::CloseConnection {
                    session_id,
                    reason: "max connections exceeded".to_string(),
                },
                ServerAction::Log {
                    level: LogLevel::Warn,
                    message: format!(
                        "connection {} refused: {} connections open",
                        session_id,
                        self.registry.session_count()
                    ),
                    timestamp: now,
                },
            ]);
        }

        self.registry.register_session(session_id, SessionInfo::new(placeholder_name(session_id)));

        Ok(vec![ServerAction::Log {
            level: LogLevel::Debug,
            message: format!("connection {} accepted", session_id),
            timestamp: now,
        }])
    }

    /// Handle a message decoded from a connection.
    fn handle_message_received(
        &mut self,
        session_id: u64,
        message: ClientMessage,
    ) -> Result<Vec<ServerAction<E::Instant>>, DriverError> {
        if !self.registry.has_session(session_id) {
            return Err(DriverError::SessionNotFound(session_id));
        }

        match message {
            ClientMessage::CreateRoom { username } => {
                self.create_room(session_id, username.as_deref())
            },
            ClientMessage::JoinRoom { room_code, username } => {
                self.join_room(session_id, &room_code, username.as_deref())
            },
            ClientMessage::ChatMessage { message } => Ok(self.relay_chat(session_id, message)),
            ClientMessage::WebrtcSignal { signal, target } => {
                Ok(self.relay_signal(session_id, signal, target))
            },
        }
    }

    /// Handle a connection being closed.
    ///
    /// Idempotent: closing an unknown or already-closed session does nothing.
    fn handle_connection_closed(
        &mut self,
        session_id: u64,
        reason: &str,
    ) -> Vec<ServerAction<E::Instant>> {
        if !self.registry.has_session(session_id) {
            return Vec::new();
        }

        let mut actions = self.leave_room(session_id);
        self.registry.unregister_session(session_id);

        actions.push(ServerAction::Log {
            level: LogLevel::Info,
            message: format!("connection {} closed: {}", session_id, reason),
            timestamp: self.env.now(),
        });
        actions
    }

    /// Open a new room with `session_id` as its only member.
    ///
    /// The session leaves its current room first. If no free code can be
    /// found the session gets an error reply and keeps its current room.
    pub fn create_room(
        &mut self,
        session_id: u64,
        username: Option<&str>,
    ) -> Result<Vec<ServerAction<E::Instant>>, DriverError> {
        let now = self.env.now();

        if !self.registry.has_session(session_id) {
            return Err(DriverError::SessionNotFound(session_id));
        }

        let room_code = match self.room_manager.create_room(session_id, &self.env) {
            Ok(room_code) => room_code,
            Err(e) => {
                return Ok(vec![
                    ServerAction::SendToSession {
                        session_id,
                        message: ServerMessage::error(ServerMessage::CODE_SPACE_EXHAUSTED),
                    },
                    ServerAction::Log {
                        level: LogLevel::Error,
                        message: format!("session {} could not create a room: {}", session_id, e),
                        timestamp: now,
                    },
                ]);
            },
        };

        let mut actions = self.leave_room(session_id);

        if let Some(name) = normalize_name(username) {
            self.registry.set_name(session_id, name);
        }
        self.registry.join(session_id, room_code);

        actions.push(ServerAction::SendToSession {
            session_id,
            message: ServerMessage::room_created(room_code.as_str()),
        });
        actions.push(ServerAction::Log {
            level: LogLevel::Info,
            message: format!("room {} created by session {}", room_code, session_id),
            timestamp: now,
        });

        Ok(actions)
    }

    /// Add `session_id` to the room named by `room_code`.
    ///
    /// The code is trimmed and uppercased before lookup. Unknown and full
    /// rooms get an error reply with no state change. Joining the room the
    /// session is already in just repeats the `room_joined` reply.
    pub fn join_room(
        &mut self,
        session_id: u64,
        room_code: &str,
        username: Option<&str>,
    ) -> Result<Vec<ServerAction<E::Instant>>, DriverError> {
        let now = self.env.now();

        if !self.registry.has_session(session_id) {
            return Err(DriverError::SessionNotFound(session_id));
        }

        let Ok(code) = RoomCode::parse(room_code) else {
            return Ok(self.refuse_join(session_id, &RoomError::RoomNotFound(room_code.to_string())));
        };

        if self.registry.room_of(session_id) == Some(code) {
            let users_count = self.registry.room_member_count(code);
            return Ok(vec![ServerAction::SendToSession {
                session_id,
                message: ServerMessage::room_joined(code.as_str(), users_count),
            }]);
        }

        if let Err(e) = self.room_manager.admit(code, self.registry.room_member_count(code)) {
            return Ok(self.refuse_join(session_id, &e));
        }

        let mut actions = self.leave_room(session_id);

        if let Some(name) = normalize_name(username) {
            self.registry.set_name(session_id, name);
        }
        self.registry.join(session_id, code);

        let users_count = self.registry.room_member_count(code);
        let name = self.session_name(session_id).unwrap_or_default().to_string();

        actions.push(ServerAction::SendToSession {
            session_id,
            message: ServerMessage::room_joined(code.as_str(), users_count),
        });
        actions.push(ServerAction::BroadcastToRoom {
            room_code: code,
            message: ServerMessage::user_joined(name, users_count),
            exclude_session: Some(session_id),
        });
        actions.push(ServerAction::Log {
            level: LogLevel::Info,
            message: format!(
                "session {} joined room {} ({} members)",
                session_id, code, users_count
            ),
            timestamp: now,
        });

        Ok(actions)
    }

    /// Remove `session_id` from its room, if any.
    ///
    /// Remaining members are told via `user_left`. The room is closed when
    /// its last member leaves.
    pub fn leave_room(&mut self, session_id: u64) -> Vec<ServerAction<E::Instant>> {
        let Some(room_code) = self.registry.leave(session_id) else {
            return Vec::new();
        };

        let remaining = self.registry.room_member_count(room_code);

        if remaining == 0 {
            self.room_manager.remove_room(room_code);
            return vec![ServerAction::Log {
                level: LogLevel::Info,
                message: format!("room {} closed", room_code),
                timestamp: self.env.now(),
            }];
        }

        let name = self.session_name(session_id).unwrap_or_default().to_string();
        vec![ServerAction::BroadcastToRoom {
            room_code,
            message: ServerMessage::user_left(name, remaining),
            exclude_session: None,
        }]
    }

    fn relay_chat(&self, session_id: u64, text: String) -> Vec<ServerAction<E::Instant>> {
        let Some(room_code) = self.registry.room_of(session_id) else {
            return self.non_member(session_id, "chat_message");
        };

        let name = self.session_name(session_id).unwrap_or_default().to_string();
        let timestamp = self.env.local_time().format("%H:%M:%S").to_string();

        vec![ServerAction::BroadcastToRoom {
            room_code,
            message: ServerMessage::chat(name, text, timestamp),
            exclude_session: None,
        }]
    }

    fn relay_signal(
        &self,
        session_id: u64,
        signal: Value,
        target: Value,
    ) -> Vec<ServerAction<E::Instant>> {
        let Some(room_code) = self.registry.room_of(session_id) else {
            return self.non_member(session_id, "webrtc_signal");
        };

        vec![ServerAction::BroadcastToRoom {
            room_code,
            message: ServerMessage::WebrtcSignal { signal, target, sender: session_id },
            exclude_session: Some(session_id),
        }]
    }

    fn refuse_join(&self, session_id: u64, error: &RoomError) -> Vec<ServerAction<E::Instant>> {
        let reply = match error {
            RoomError::RoomFull { .. } => ServerMessage::ROOM_FULL,
            _ => ServerMessage::ROOM_NOT_FOUND,
        };

        vec![
            ServerAction::SendToSession { session_id, message: ServerMessage::error(reply) },
            ServerAction::Log {
                level: LogLevel::Debug,
                message: format!("session {} join refused: {}", session_id, error),
                timestamp: self.env.now(),
            },
        ]
    }

    fn non_member(&self, session_id: u64, message_type: &str) -> Vec<ServerAction<E::Instant>> {
        let log = ServerAction::Log {
            level: LogLevel::Debug,
            message: format!("{} from session {} outside any room", message_type, session_id),
            timestamp: self.env.now(),
        };

        match self.config.non_member_policy {
            NonMemberPolicy::Ignore => vec![log],
            NonMemberPolicy::Reject => vec![
                ServerAction::SendToSession {
                    session_id,
                    message: ServerMessage::error(ServerMessage::NOT_IN_ROOM),
                },
                log,
            ],
        }
    }

    /// All sessions in a room.
    pub fn sessions_in_room(&self, room_code: RoomCode) -> impl Iterator<Item = u64> + '_ {
        self.registry.sessions_in_room(room_code)
    }

    /// Number of members in a room.
    pub fn room_member_count(&self, room_code: RoomCode) -> usize {
        self.registry.room_member_count(room_code)
    }

    /// Number of active connections.
    pub fn connection_count(&self) -> usize {
        self.registry.session_count()
    }

    /// Number of open rooms.
    pub fn room_count(&self) -> usize {
        self.room_manager.room_count()
    }

    /// Room is open.
    pub fn has_room(&self, room_code: RoomCode) -> bool {
        self.room_manager.has_room(room_code)
    }

    /// Codes of all open rooms.
    pub fn room_codes(&self) -> impl Iterator<Item = RoomCode> + '_ {
        self.room_manager.room_codes()
    }

    /// Session is registered.
    pub fn has_session(&self, session_id: u64) -> bool {
        self.registry.has_session(session_id)
    }

    /// All registered sessions.
    pub fn session_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.registry.session_ids()
    }

    /// Display name of a session.
    pub fn session_name(&self, session_id: u64) -> Option<&str> {
        self.registry.session(session_id).map(|info| info.name.as_str())
    }

    /// Room a session belongs to.
    pub fn session_room(&self, session_id: u64) -> Option<RoomCode> {
        self.registry.room_of(session_id)
    }

    /// Driver configuration.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }
}

impl<E: Environment> std::fmt::Debug for ServerDriver<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerDriver")
            .field("session_count", &self.registry.session_count())
            .field("room_count", &self.room_manager.room_count())
            .finish()
    }
}

/// Name used until a session supplies its own.
pub fn placeholder_name(session_id: u64) -> String {
    format!("Guest-{:04X}", session_id & 0xFFFF)
}

/// Trim and truncate a client-supplied name. Blank names count as absent.
fn normalize_name(username: Option<&str>) -> Option<String> {
    let name = username?.trim();
    if name.is_empty() {
        return None;
    }
    Some(name.chars().take(MAX_NAME_CHARS).collect())
}
