//! Room Manager
//!
//! Owns the set of open rooms and the rules for entering them: code
//! allocation on creation and the capacity check on join. Membership itself
//! lives in the [`ConnectionRegistry`](crate::ConnectionRegistry); the driver
//! consults both and keeps them in step, removing a room here the moment its
//! last member leaves.
//!
//! Rooms are created explicitly (no lazy creation on join), so a mistyped
//! code is always an error rather than a new empty room.

use std::collections::HashMap;

use roomrelay_core::{Environment, RoomCode};

/// Default member limit for a room.
pub const DEFAULT_ROOM_CAPACITY: usize = 10;

/// Attempts at drawing an unused code before giving up on a create.
pub const MAX_CODE_ATTEMPTS: usize = 64;

/// Metadata about an open room
#[derive(Debug, Clone)]
pub struct RoomMetadata<I> {
    /// Session that created the room
    pub creator: u64,
    /// When the room was created
    pub created_at: I,
}

/// Errors from RoomManager operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    /// No open room has this code
    #[error("room not found: {0}")]
    RoomNotFound(String),

    /// Room already holds its maximum number of members
    #[error("room full: {room_code} holds {capacity} members")]
    RoomFull {
        /// Room that was full
        room_code: RoomCode,
        /// Its member limit
        capacity: usize,
    },

    /// Every drawn code collided with an open room
    #[error("no free room code after {attempts} attempts")]
    CodeSpaceExhausted {
        /// Number of codes tried
        attempts: usize,
    },
}

/// Tracks open rooms and enforces capacity.
///
/// Generic over `I` (Instant type) to support virtual time in tests.
pub struct RoomManager<I = std::time::Instant> {
    /// Room metadata keyed by code
    room_metadata: HashMap<RoomCode, RoomMetadata<I>>,
    /// Member limit applied to every room
    capacity: usize,
}

impl<I: Copy> RoomManager<I> {
    /// Create a RoomManager with the default room capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_ROOM_CAPACITY)
    }

    /// Create a RoomManager whose rooms hold at most `capacity` members.
    ///
    /// A capacity of zero is raised to one so the creator always fits.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { room_metadata: HashMap::new(), capacity: capacity.max(1) }
    }

    /// Member limit applied to every room
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Check if a room exists
    pub fn has_room(&self, room_code: RoomCode) -> bool {
        self.room_metadata.contains_key(&room_code)
    }

    /// Number of open rooms
    pub fn room_count(&self) -> usize {
        self.room_metadata.len()
    }

    /// Metadata for an open room
    pub fn metadata(&self, room_code: RoomCode) -> Option<&RoomMetadata<I>> {
        self.room_metadata.get(&room_code)
    }

    /// Codes of all open rooms
    pub fn room_codes(&self) -> impl Iterator<Item = RoomCode> + '_ {
        self.room_metadata.keys().copied()
    }

    /// Open a room under a fresh code.
    ///
    /// Draws codes from the environment's RNG until one is not in use. The
    /// caller is responsible for adding `creator` as the first member.
    pub fn create_room<E: Environment<Instant = I>>(
        &mut self,
        creator: u64,
        env: &E,
    ) -> Result<RoomCode, RoomError> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let room_code = RoomCode::generate(env);
            if self.has_room(room_code) {
                continue;
            }

            let metadata = RoomMetadata { creator, created_at: env.now() };
            self.room_metadata.insert(room_code, metadata);
            return Ok(room_code);
        }

        Err(RoomError::CodeSpaceExhausted { attempts: MAX_CODE_ATTEMPTS })
    }

    /// Check whether a room can take one more member.
    ///
    /// `member_count` is the room's current size as tracked by the registry.
    pub fn admit(&self, room_code: RoomCode, member_count: usize) -> Result<(), RoomError> {
        if !self.has_room(room_code) {
            return Err(RoomError::RoomNotFound(room_code.to_string()));
        }

        if member_count >= self.capacity {
            return Err(RoomError::RoomFull { room_code, capacity: self.capacity });
        }

        Ok(())
    }

    /// Close a room. Returns its metadata if it was open.
    pub fn remove_room(&mut self, room_code: RoomCode) -> Option<RoomMetadata<I>> {
        self.room_metadata.remove(&room_code)
    }
}

impl<I: Copy> Default for RoomManager<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Copy> std::fmt::Debug for RoomManager<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomManager")
            .field("room_count", &self.room_metadata.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
