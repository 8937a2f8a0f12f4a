//! Runtime error type.

use std::fmt;

use crate::driver_error::DriverError;

/// Failures surfaced by the relay runtime.
///
/// Protocol problems never show up here: undecodable or oversized documents
/// are dropped inside the connection's read loop.
#[derive(Debug)]
pub enum ServerError {
    /// Invalid startup settings. Fatal before the first accept.
    Config(String),

    /// Socket failure. Ends the affected connection, or startup when binding.
    Transport(String),

    /// The runtime could not keep one of its own guarantees, such as finding
    /// a free session ID. Refuses the affected connection only.
    Internal(String),

    /// The driver rejected an event.
    Driver(DriverError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
            Self::Driver(err) => write!(f, "driver error: {err}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Driver(err) => Some(err),
            Self::Config(_) | Self::Transport(_) | Self::Internal(_) => None,
        }
    }
}

impl From<DriverError> for ServerError {
    fn from(err: DriverError) -> Self {
        Self::Driver(err)
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
