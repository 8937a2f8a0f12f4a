//! Connection registry for session and room membership tracking.
//!
//! The registry maintains bidirectional mappings: room → sessions (for
//! broadcast) and session → room (for cleanup on disconnect). Both directions
//! are O(1).
//!
//! A session belongs to at most one room. Joining a second room requires
//! leaving the first; the registry refuses to hold a session in two rooms.
//! Member sets are dropped as soon as they become empty, so a room code is
//! present here exactly while it has members.

use std::collections::{HashMap, HashSet};

use roomrelay_core::RoomCode;

/// Information about a registered session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Display name shown to other members
    pub name: String,
    /// Room the session currently belongs to
    pub room: Option<RoomCode>,
}

impl SessionInfo {
    /// Create session info for a connection that has not joined a room yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), room: None }
    }
}

/// Registry for tracking sessions and room membership.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// Session ID → session info
    sessions: HashMap<u64, SessionInfo>,
    /// Room code → member session IDs
    room_members: HashMap<RoomCode, HashSet<u64>>,
}

impl ConnectionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session.
    ///
    /// Returns `false` if the session already exists. Any room set in `info`
    /// is ignored; membership only changes through [`Self::join`].
    pub fn register_session(&mut self, session_id: u64, mut info: SessionInfo) -> bool {
        if self.sessions.contains_key(&session_id) {
            return false;
        }

        info.room = None;
        self.sessions.insert(session_id, info);
        true
    }

    /// Unregister a session, removing it from its room.
    ///
    /// Returns the session info as it was before removal, so callers can see
    /// which room it left.
    pub fn unregister_session(&mut self, session_id: u64) -> Option<SessionInfo> {
        let info = self.sessions.remove(&session_id)?;
        if let Some(room) = info.room {
            self.remove_member(room, session_id);
        }
        Some(info)
    }

    /// Session metadata. `None` if session doesn't exist.
    pub fn session(&self, session_id: u64) -> Option<&SessionInfo> {
        self.sessions.get(&session_id)
    }

    /// Check if a session is registered.
    pub fn has_session(&self, session_id: u64) -> bool {
        self.sessions.contains_key(&session_id)
    }

    /// Change a session's display name.
    ///
    /// Returns `false` if the session doesn't exist.
    pub fn set_name(&mut self, session_id: u64, name: impl Into<String>) -> bool {
        match self.sessions.get_mut(&session_id) {
            Some(info) => {
                info.name = name.into();
                true
            },
            None => false,
        }
    }

    /// Add a session to a room.
    ///
    /// Returns `false` if the session doesn't exist or already belongs to a
    /// room (including this one).
    pub fn join(&mut self, session_id: u64, room: RoomCode) -> bool {
        let Some(info) = self.sessions.get_mut(&session_id) else {
            return false;
        };
        if info.room.is_some() {
            return false;
        }

        info.room = Some(room);
        self.room_members.entry(room).or_default().insert(session_id);
        true
    }

    /// Remove a session from its room.
    ///
    /// Returns the room it left, or `None` if it wasn't in one.
    pub fn leave(&mut self, session_id: u64) -> Option<RoomCode> {
        let room = self.sessions.get_mut(&session_id)?.room.take()?;
        self.remove_member(room, session_id);
        Some(room)
    }

    /// Room the session belongs to.
    pub fn room_of(&self, session_id: u64) -> Option<RoomCode> {
        self.sessions.get(&session_id).and_then(|info| info.room)
    }

    /// All sessions in a room. Empty if the room has no members.
    pub fn sessions_in_room(&self, room: RoomCode) -> impl Iterator<Item = u64> + '_ {
        self.room_members.get(&room).into_iter().flat_map(|members| members.iter().copied())
    }

    /// Number of sessions in a room.
    pub fn room_member_count(&self, room: RoomCode) -> usize {
        self.room_members.get(&room).map_or(0, HashSet::len)
    }

    /// Number of rooms with at least one member.
    pub fn occupied_room_count(&self) -> usize {
        self.room_members.len()
    }

    /// Total number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// All registered session IDs.
    pub fn session_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.sessions.keys().copied()
    }

    fn remove_member(&mut self, room: RoomCode, session_id: u64) {
        if let Some(members) = self.room_members.get_mut(&room) {
            members.remove(&session_id);
            if members.is_empty() {
                self.room_members.remove(&room);
            }
        }
    }
}
