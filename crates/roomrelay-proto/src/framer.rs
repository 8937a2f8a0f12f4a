//! Incremental JSON document framer.
//!
//! The wire carries raw JSON objects back to back with no length prefix or
//! delimiter, so message boundaries are recovered by scanning. The scanner
//! tracks brace depth, whether it is inside a string literal, and whether the
//! previous byte was a backslash escape. Braces inside strings never affect
//! depth, which is what keeps payloads like `"a}{b"` intact.
//!
//! Scanner state survives across [`JsonFramer::extend`] calls: every byte is
//! inspected exactly once, no matter how the stream was split into reads.
//!
//! # Invariants
//!
//! - A yielded frame always starts with `{` and ends with the matching `}`.
//! - Frames are yielded in stream order.
//! - Bytes outside any object (whitespace, stray garbage) are skipped.
//! - Buffered bytes for one document never exceed `max_document_size`.
//!
//! # Recovery
//!
//! A document that reaches `max_document_size` without closing is reported
//! once and its bytes are dropped. The scanner then returns to `Idle` and
//! resynchronizes at the next `{`. This covers both honest oversized
//! documents and truncated ones (a missing `}` or an unterminated string)
//! that would otherwise swallow every later document. The tail of a dropped
//! document is scanned as ordinary input, so it may surface as undecodable
//! fragments that the caller discards.

use bytes::{Buf, Bytes, BytesMut};

use crate::errors::{ProtocolError, Result};

/// Default upper bound for one JSON document (64 KiB).
pub const DEFAULT_MAX_DOCUMENT_SIZE: usize = 64 * 1024;

/// Scanner position relative to the document structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// Between documents, waiting for `{`
    Idle,
    /// Inside an object, outside any string
    Object,
    /// Inside a string literal
    String,
    /// Directly after a backslash inside a string literal
    Escape,
}

/// Splits a byte stream into complete JSON object documents.
///
/// Feed bytes with [`extend`](Self::extend) as they arrive and drain complete
/// documents with [`next_frame`](Self::next_frame) until it returns `None`.
/// The framer can be resumed at any point: a `None` only means "need more
/// bytes".
#[derive(Debug)]
pub struct JsonFramer {
    /// Unconsumed bytes; `buf[..scanned]` has already been inspected
    buf: BytesMut,
    /// Number of bytes in `buf` already scanned
    scanned: usize,
    /// Brace nesting depth of the current document
    depth: usize,
    /// Current scanner state
    state: ScanState,
    /// Maximum size of a single document
    max_document_size: usize,
}

impl Default for JsonFramer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DOCUMENT_SIZE)
    }
}

impl JsonFramer {
    /// Create a framer bounded to `max_document_size` bytes per document.
    pub fn new(max_document_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            scanned: 0,
            depth: 0,
            state: ScanState::Idle,
            max_document_size,
        }
    }

    /// Append freshly read bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of bytes buffered but not yet yielded.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Whether the scanner is in the middle of a document.
    pub fn is_mid_document(&self) -> bool {
        self.state != ScanState::Idle
    }

    /// Next complete document, if one is available.
    ///
    /// Returns `Some(Err(DocumentTooLarge))` once per oversized or truncated
    /// document; the stream stays usable afterwards.
    pub fn next_frame(&mut self) -> Option<Result<Bytes>> {
        while self.scanned < self.buf.len() {
            let byte = self.buf[self.scanned];
            self.scanned += 1;

            match self.state {
                ScanState::Idle => {
                    if byte == b'{' {
                        // Drop skipped garbage so the document starts at 0
                        self.buf.advance(self.scanned - 1);
                        self.scanned = 1;
                        self.depth = 1;
                        self.state = ScanState::Object;
                    }
                },
                ScanState::Object => match byte {
                    b'{' => self.depth += 1,
                    b'}' => {
                        self.depth -= 1;
                        if self.depth == 0 {
                            self.state = ScanState::Idle;
                            let frame = self.buf.split_to(self.scanned).freeze();
                            self.scanned = 0;
                            return Some(Ok(frame));
                        }
                    },
                    b'"' => self.state = ScanState::String,
                    _ => {},
                },
                ScanState::String => match byte {
                    b'\\' => self.state = ScanState::Escape,
                    b'"' => self.state = ScanState::Object,
                    _ => {},
                },
                ScanState::Escape => self.state = ScanState::String,
            }

            if self.state != ScanState::Idle && self.scanned >= self.max_document_size {
                let size = self.scanned;
                self.buf.advance(self.scanned);
                self.scanned = 0;
                self.depth = 0;
                self.state = ScanState::Idle;
                return Some(Err(ProtocolError::DocumentTooLarge {
                    size,
                    max: self.max_document_size,
                }));
            }
        }

        if self.state == ScanState::Idle {
            // Nothing but inter-document garbage left
            self.buf.clear();
            self.scanned = 0;
        }

        None
    }
}
