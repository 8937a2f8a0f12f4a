//! Shared building blocks for the roomrelay server and its test harness.
//!
//! - [`Environment`]: time and randomness, swappable for simulation
//! - [`RoomCode`]: the six-character room identifier and its generator

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod env;
pub mod room_code;

pub use env::Environment;
pub use room_code::{ROOM_CODE_ALPHABET, ROOM_CODE_LEN, RoomCode, RoomCodeError};
