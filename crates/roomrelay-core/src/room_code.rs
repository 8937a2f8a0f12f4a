//! Room codes.
//!
//! A room code is six characters from `A-Z0-9`, short enough to read out
//! loud across a room. The space holds 36^6 (about 2.2 billion) codes, so
//! random generation with a collision retry is cheap in practice.

use std::{fmt, str::FromStr};

use thiserror::Error;

use crate::env::Environment;

/// Number of characters in a room code.
pub const ROOM_CODE_LEN: usize = 6;

/// Characters a room code is drawn from.
pub const ROOM_CODE_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Largest multiple of the alphabet size that fits in a byte. Bytes at or
/// above it are rejected so every character is equally likely.
const UNBIASED_LIMIT: u8 = 252;

/// Errors from parsing user-supplied room codes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoomCodeError {
    /// Code has the wrong number of characters
    #[error("room code must be 6 characters, got {0}")]
    InvalidLength(usize),

    /// Code contains a character outside `A-Z0-9`
    #[error("invalid room code character: {0:?}")]
    InvalidCharacter(char),
}

/// Six-character room identifier.
///
/// Always holds uppercase ASCII alphanumerics; constructing one any other way
/// is impossible.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomCode([u8; ROOM_CODE_LEN]);

impl RoomCode {
    /// Draw a uniformly random code from the environment's RNG.
    pub fn generate<E: Environment>(env: &E) -> Self {
        let mut code = [0u8; ROOM_CODE_LEN];
        let mut filled = 0;
        let mut entropy = [0u8; 16];

        while filled < ROOM_CODE_LEN {
            env.random_bytes(&mut entropy);
            for &byte in &entropy {
                if byte < UNBIASED_LIMIT {
                    code[filled] = ROOM_CODE_ALPHABET[usize::from(byte % 36)];
                    filled += 1;
                    if filled == ROOM_CODE_LEN {
                        break;
                    }
                }
            }
        }

        Self(code)
    }

    /// Parse user input, tolerating surrounding whitespace and lowercase.
    pub fn parse(input: &str) -> Result<Self, RoomCodeError> {
        let input = input.trim();
        let len = input.chars().count();
        if len != ROOM_CODE_LEN {
            return Err(RoomCodeError::InvalidLength(len));
        }

        let mut code = [0u8; ROOM_CODE_LEN];
        for (slot, ch) in code.iter_mut().zip(input.chars()) {
            if !ch.is_ascii_alphanumeric() {
                return Err(RoomCodeError::InvalidCharacter(ch));
            }
            *slot = ch.to_ascii_uppercase() as u8;
        }

        Ok(Self(code))
    }

    /// The code as a string slice.
    pub fn as_str(&self) -> &str {
        // INVARIANT: both constructors only store ASCII alphanumerics
        #[allow(clippy::expect_used)]
        std::str::from_utf8(&self.0).expect("invariant: room codes are ASCII")
    }
}

impl FromStr for RoomCode {
    type Err = RoomCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RoomCode({})", self.as_str())
    }
}
