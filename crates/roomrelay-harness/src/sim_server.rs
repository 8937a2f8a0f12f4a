//! Simulation server wrapper for testing with turmoil.
//!
//! `SimServer` runs the production [`Relay`] runtime unchanged; only the
//! listener and the environment are swapped. Sockets come from turmoil's
//! simulated network and time and randomness from [`SimEnv`], so a run is a
//! pure function of its seed and network configuration.

use std::{fmt, io, net::SocketAddr, time::Duration};

use roomrelay_server::{Listener, Relay, ServerRuntimeConfig};
use turmoil::net::{TcpListener, TcpStream};

use crate::SimEnv;

/// Turmoil listener adapted to the relay's accept loop.
pub struct SimListener(TcpListener);

impl fmt::Debug for SimListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SimListener").field(&self.0.local_addr().ok()).finish()
    }
}

impl SimListener {
    /// Bind inside the current simulated host.
    pub async fn bind(address: &str) -> io::Result<Self> {
        Ok(Self(TcpListener::bind(address).await?))
    }
}

impl Listener for SimListener {
    type Stream = TcpStream;

    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.0.accept().await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.0.local_addr()
    }
}

/// Simulation server for testing with turmoil.
pub struct SimServer {
    relay: Relay<SimEnv>,
    listener: SimListener,
    shutdown_grace: Duration,
}

impl SimServer {
    /// Create and bind a new simulation server with default limits.
    pub async fn bind(address: &str) -> io::Result<Self> {
        Self::bind_with(address, Relay::new(SimEnv::new(), &ServerRuntimeConfig::default())).await
    }

    /// Bind a server around an existing relay.
    ///
    /// Tests build the relay outside the simulation so they can inspect it
    /// and trigger shutdown from client hosts.
    pub async fn bind_with(address: &str, relay: Relay<SimEnv>) -> io::Result<Self> {
        let listener = SimListener::bind(address).await?;
        tracing::debug!("Simulation server bound to {}", address);
        Ok(Self { relay, listener, shutdown_grace: Duration::from_secs(1) })
    }

    /// Override how long shutdown waits for connections.
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Shared handle to the running relay.
    pub fn relay(&self) -> Relay<SimEnv> {
        self.relay.clone()
    }

    /// Serve until the relay's shutdown handle is triggered.
    pub async fn run(self) -> io::Result<()> {
        self.relay
            .run(self.listener, self.shutdown_grace)
            .await
            .map_err(|e| io::Error::other(e.to_string()))
    }
}

/// Build a relay for simulation from a seed and runtime config.
pub fn sim_relay(seed: u64, config: &ServerRuntimeConfig) -> Relay<SimEnv> {
    Relay::new(SimEnv::with_seed(seed), config)
}
