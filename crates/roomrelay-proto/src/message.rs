//! JSON wire messages.
//!
//! Every message is a single JSON object whose `type` field selects the
//! variant. Client and server speak disjoint message sets, except for
//! `chat_message` and `webrtc_signal` which exist in both directions with
//! different shapes (the server attaches sender identity).
//!
//! Signaling payloads are kept as [`serde_json::Value`]: the relay forwards
//! them verbatim and never looks inside.

use bytes::Bytes;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::errors::{ProtocolError, Result};

/// Messages sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Open a new room with the sender as its only member
    CreateRoom {
        /// Display name to use inside the room
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },

    /// Join an existing room by code
    JoinRoom {
        /// Code of the room to join
        room_code: String,
        /// Display name to use inside the room
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },

    /// Chat text for the sender's room
    ChatMessage {
        /// Message text
        #[serde(default)]
        message: String,
    },

    /// Opaque signaling payload for the other room members
    WebrtcSignal {
        /// Signal body, forwarded untouched
        #[serde(default)]
        signal: Value,
        /// Addressing hint, forwarded untouched
        #[serde(default)]
        target: Value,
    },
}

impl ClientMessage {
    /// Decode one framed JSON document.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        decode_json(bytes)
    }

    /// Encode as a JSON document.
    pub fn encode(&self) -> Result<Bytes> {
        encode_json(self)
    }

    /// Wire name of this message type.
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::CreateRoom { .. } => "create_room",
            Self::JoinRoom { .. } => "join_room",
            Self::ChatMessage { .. } => "chat_message",
            Self::WebrtcSignal { .. } => "webrtc_signal",
        }
    }

    /// Whether this message only makes sense from a room member.
    pub fn requires_membership(&self) -> bool {
        matches!(self, Self::ChatMessage { .. } | Self::WebrtcSignal { .. })
    }
}

/// Messages sent by the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Reply to `create_room`
    RoomCreated {
        /// Code of the new room
        room_code: String,
        /// Human-readable confirmation
        message: String,
    },

    /// Reply to a successful `join_room`
    RoomJoined {
        /// Code of the joined room
        room_code: String,
        /// Human-readable confirmation
        message: String,
        /// Member count including the joiner
        users_count: usize,
    },

    /// Someone else joined the recipient's room
    UserJoined {
        /// Display name of the joiner
        username: String,
        /// Human-readable notice
        message: String,
        /// Member count including the joiner
        users_count: usize,
    },

    /// Someone left the recipient's room
    UserLeft {
        /// Display name of the member who left
        username: String,
        /// Human-readable notice
        message: String,
        /// Remaining member count
        users_count: usize,
    },

    /// Chat text relayed to the room
    ChatMessage {
        /// Display name of the author
        username: String,
        /// Message text
        message: String,
        /// Server local time, `HH:MM:SS`
        timestamp: String,
    },

    /// Request failed
    Error {
        /// Error description
        message: String,
    },

    /// Signaling payload relayed from another member
    WebrtcSignal {
        /// Signal body, as sent
        signal: Value,
        /// Addressing hint, as sent
        target: Value,
        /// Opaque identifier of the sending connection
        sender: u64,
    },
}

impl ServerMessage {
    /// Error text for an unknown room code.
    pub const ROOM_NOT_FOUND: &'static str = "room not found";
    /// Error text for a room at capacity.
    pub const ROOM_FULL: &'static str = "room full";
    /// Error text for membership-only messages from outside a room.
    pub const NOT_IN_ROOM: &'static str = "not in a room";
    /// Error text when no free room code could be found.
    pub const CODE_SPACE_EXHAUSTED: &'static str = "could not allocate a room code";

    /// Build a `room_created` reply.
    pub fn room_created(room_code: impl Into<String>) -> Self {
        let room_code = room_code.into();
        Self::RoomCreated { message: format!("Room created! Code: {room_code}"), room_code }
    }

    /// Build a `room_joined` reply.
    pub fn room_joined(room_code: impl Into<String>, users_count: usize) -> Self {
        let room_code = room_code.into();
        Self::RoomJoined { message: format!("You joined room {room_code}"), room_code, users_count }
    }

    /// Build a `user_joined` notice.
    pub fn user_joined(username: impl Into<String>, users_count: usize) -> Self {
        let username = username.into();
        Self::UserJoined { message: format!("{username} joined the chat"), username, users_count }
    }

    /// Build a `user_left` notice.
    pub fn user_left(username: impl Into<String>, users_count: usize) -> Self {
        let username = username.into();
        Self::UserLeft { message: format!("{username} left the chat"), username, users_count }
    }

    /// Build a relayed chat message.
    pub fn chat(
        username: impl Into<String>,
        message: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self::ChatMessage {
            username: username.into(),
            message: message.into(),
            timestamp: timestamp.into(),
        }
    }

    /// Build an `error` reply.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error { message: message.into() }
    }

    /// Decode one framed JSON document.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        decode_json(bytes)
    }

    /// Encode as a JSON document.
    pub fn encode(&self) -> Result<Bytes> {
        encode_json(self)
    }

    /// Wire name of this message type.
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::RoomCreated { .. } => "room_created",
            Self::RoomJoined { .. } => "room_joined",
            Self::UserJoined { .. } => "user_joined",
            Self::UserLeft { .. } => "user_left",
            Self::ChatMessage { .. } => "chat_message",
            Self::Error { .. } => "error",
            Self::WebrtcSignal { .. } => "webrtc_signal",
        }
    }
}

fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| ProtocolError::JsonDecode(e.to_string()))
}

fn encode_json<T: Serialize>(value: &T) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| ProtocolError::JsonEncode(e.to_string()))
}
