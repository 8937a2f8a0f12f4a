//! Driver error types.
//!
//! Room-level failures (unknown code, full room, exhausted code space) are
//! not errors at this level: the driver answers them with an `error` reply
//! to the requesting client. What remains are events that name a session the
//! driver does not know, or re-register one it already does.

use std::fmt;

/// Errors that can occur while the driver processes an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// Session not found in registry.
    ///
    /// Occurs when an event names a session the driver never accepted or has
    /// already closed. May be transient if the session was just evicted.
    SessionNotFound(u64),

    /// Session already registered.
    ///
    /// The runtime handed out a session ID that is still in use. This is a
    /// logic bug in the runtime's ID allocation.
    SessionAlreadyExists(u64),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionNotFound(id) => write!(f, "session not found: {id}"),
            Self::SessionAlreadyExists(id) => write!(f, "session already exists: {id}"),
        }
    }
}

impl std::error::Error for DriverError {}
