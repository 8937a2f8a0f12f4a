//! Protocol error types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while framing or decoding wire messages.
///
/// None of these are fatal to a connection. The relay drops the offending
/// document and keeps reading.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Document bytes were not valid JSON for any known message.
    #[error("JSON decode error: {0}")]
    JsonDecode(String),

    /// Message could not be serialized.
    #[error("JSON encode error: {0}")]
    JsonEncode(String),

    /// A single document grew past the configured limit before closing.
    #[error("document too large: {size} bytes exceeds maximum {max}")]
    DocumentTooLarge {
        /// Bytes buffered when the limit was hit
        size: usize,
        /// Configured maximum
        max: usize,
    },
}
