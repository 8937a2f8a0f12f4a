//! Deterministic simulation harness for Roomrelay testing.
//!
//! Turmoil-based implementations of the Environment and listener seams for
//! deterministic, reproducible testing of the full relay runtime, plus a
//! scripted client that speaks the wire protocol over any byte stream.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod sim_env;
pub mod sim_server;

pub use client::RelayClient;
pub use sim_env::SimEnv;
pub use sim_server::{SimListener, SimServer, sim_relay};
