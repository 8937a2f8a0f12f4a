//! Roomrelay wire protocol.
//!
//! Clients and the relay exchange JSON objects over a raw TCP stream with no
//! length prefix and no delimiter. This crate provides the two halves needed
//! to speak that protocol:
//!
//! - [`JsonFramer`]: recovers document boundaries from the byte stream
//! - [`ClientMessage`] / [`ServerMessage`]: typed message sets
//!
//! Pure data and parsing only; no I/O.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod errors;
pub mod framer;
pub mod message;

pub use errors::ProtocolError;
pub use framer::{DEFAULT_MAX_DOCUMENT_SIZE, JsonFramer};
pub use message::{ClientMessage, ServerMessage};
