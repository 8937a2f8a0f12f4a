//! Roomrelay production server.
//!
//! A chat and signaling relay for small groups on a local network. Clients
//! connect over raw TCP, exchange JSON messages, and meet in rooms named by
//! six-character codes.
//!
//! # Architecture
//!
//! The [`ServerDriver`] follows the Sans-IO pattern: it consumes
//! [`ServerEvent`]s and returns [`ServerAction`]s without touching a socket.
//! [`Relay`] is the runtime around it. It owns one reader loop and one writer
//! task per connection and executes actions through the fan-out in
//! [`execute_actions`].
//!
//! # Components
//!
//! - [`ServerDriver`]: Action-based orchestrator (pure logic, no I/O)
//! - [`Relay`]: Connection runtime, generic over environment and socket type
//! - [`Server`]: Production entry point binding a [`TcpTransport`]
//! - [`SystemEnv`]: Production environment (real time, crypto RNG)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod driver;
mod driver_error;
mod error;
mod executor;
mod registry;
mod room_manager;
mod system_env;
mod transport;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use bytes::Bytes;
pub use driver::{
    DriverConfig, LogLevel, MAX_NAME_CHARS, NonMemberPolicy, ServerAction, ServerDriver,
    ServerEvent, placeholder_name,
};
pub use driver_error::DriverError;
pub use error::ServerError;
pub use executor::{DeliveryError, ExecutionReport, Outbox, SessionHandle, execute_actions};
pub use registry::{ConnectionRegistry, SessionInfo};
pub use room_manager::{
    DEFAULT_ROOM_CAPACITY, MAX_CODE_ATTEMPTS, RoomError, RoomManager, RoomMetadata,
};
use roomrelay_core::Environment;
use roomrelay_proto::{ClientMessage, DEFAULT_MAX_DOCUMENT_SIZE, JsonFramer};
pub use system_env::SystemEnv;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::{Mutex, Notify, mpsc, watch},
    task::JoinSet,
};
pub use transport::{Listener, TcpTransport};

/// Bytes requested from the socket per read.
pub const READ_BUFFER_SIZE: usize = 4096;

/// Draws from the environment before session ID allocation gives up.
const MAX_SESSION_ID_ATTEMPTS: usize = 64;

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:8888")
    pub bind_address: String,
    /// Driver configuration (limits, policies)
    pub driver: DriverConfig,
    /// Largest inbound JSON document accepted, in bytes
    pub max_message_size: usize,
    /// Messages buffered per connection before it counts as stuck
    pub outbound_queue: usize,
    /// Longest a single socket write may take
    pub write_timeout: Duration,
    /// How long shutdown waits for connections to finish
    pub shutdown_grace: Duration,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8888".to_string(),
            driver: DriverConfig::default(),
            max_message_size: DEFAULT_MAX_DOCUMENT_SIZE,
            outbound_queue: 256,
            write_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

impl ServerRuntimeConfig {
    /// Reject limits the relay cannot run with.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.driver.max_connections == 0 {
            return Err(ServerError::Config("max_connections must be at least 1".to_string()));
        }
        if self.driver.room_capacity == 0 {
            return Err(ServerError::Config("room_capacity must be at least 1".to_string()));
        }
        if self.max_message_size == 0 {
            return Err(ServerError::Config("max_message_size must be at least 1".to_string()));
        }
        if self.outbound_queue == 0 {
            return Err(ServerError::Config("outbound_queue must be at least 1".to_string()));
        }
        if self.write_timeout.is_zero() {
            return Err(ServerError::Config("write_timeout must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Idempotent stop signal shared by the accept loop and its owner.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    /// Create an untriggered handle.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request shutdown. Calling it again has no further effect.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Shutdown has been requested.
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until shutdown is requested.
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

/// Per-connection limits copied out of the runtime config.
#[derive(Debug, Clone, Copy)]
struct ConnectionLimits {
    max_message_size: usize,
    outbound_queue: usize,
    write_timeout: Duration,
}

/// Driver plus outbound queues, locked together so membership and fan-out
/// targets can never disagree.
struct SharedState<E: Environment> {
    driver: ServerDriver<E>,
    outbox: Outbox,
}

impl<E: Environment> SharedState<E> {
    fn apply(&mut self, event: ServerEvent) -> Result<ExecutionReport, DriverError> {
        let actions = self.driver.process_event(event)?;
        Ok(execute_actions(&mut self.driver, &mut self.outbox, actions))
    }
}

/// Connection runtime around a [`ServerDriver`].
///
/// Cheap to clone; clones share the same rooms and sessions.
#[derive(Clone)]
pub struct Relay<E: Environment> {
    shared: Arc<Mutex<SharedState<E>>>,
    env: E,
    limits: ConnectionLimits,
    shutdown: ShutdownHandle,
}

impl<E: Environment> Relay<E> {
    /// Create a relay with no connections.
    pub fn new(env: E, config: &ServerRuntimeConfig) -> Self {
        let driver = ServerDriver::new(env.clone(), config.driver.clone());
        Self {
            shared: Arc::new(Mutex::new(SharedState { driver, outbox: Outbox::new() })),
            env,
            limits: ConnectionLimits {
                max_message_size: config.max_message_size.max(1),
                outbound_queue: config.outbound_queue.max(1),
                write_timeout: config.write_timeout,
            },
            shutdown: ShutdownHandle::new(),
        }
    }

    /// Handle that stops [`Relay::run`].
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Inspect driver state under the relay lock.
    pub async fn with_driver<R>(&self, f: impl FnOnce(&ServerDriver<E>) -> R) -> R {
        let state = self.shared.lock().await;
        f(&state.driver)
    }

    /// Ask every open connection to close. Returns how many were signalled.
    pub async fn close_all_sessions(&self) -> usize {
        let state = self.shared.lock().await;
        state.outbox.close_all()
    }

    /// Accept connections from `listener` until shutdown is triggered.
    ///
    /// On shutdown the accept loop stops, every session is told to close,
    /// and connection tasks get `shutdown_grace` to finish before they are
    /// aborted. The listener is released last.
    pub async fn run<L: Listener>(
        &self,
        listener: L,
        shutdown_grace: Duration,
    ) -> Result<(), ServerError> {
        tracing::info!("Relay listening on {}", listener.local_addr()?);

        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                () = self.shutdown.triggered() => break,

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let relay = self.clone();
                        connections.spawn(async move {
                            if let Err(e) = relay.serve_connection(stream, peer).await {
                                tracing::debug!("Connection error from {}: {}", peer, e);
                            }
                        });
                    },
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    },
                },

                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    match joined {
                        Err(e) if e.is_panic() => {
                            tracing::error!("Connection task panicked: {}", e);
                        },
                        _ => {},
                    }
                },
            }
        }

        // The accept loop is gone; the socket stays bound until sessions drain
        let signalled = self.close_all_sessions().await;
        tracing::info!("Shutting down, closing {} connections", signalled);

        let drained = tokio::time::timeout(shutdown_grace, async {
            while connections.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                "{} connections still open after {:?}, aborting",
                connections.len(),
                shutdown_grace
            );
            connections.shutdown().await;
        }
        drop(listener);

        tracing::info!("Relay stopped");
        Ok(())
    }

    /// Serve one connection until the peer leaves or the relay closes it.
    ///
    /// Registers a session, pumps inbound bytes through the framer into the
    /// driver, and always unregisters the session on the way out.
    pub async fn serve_connection<S>(&self, stream: S, peer: SocketAddr) -> Result<(), ServerError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (handle, outbound) = SessionHandle::channel(self.limits.outbound_queue);
        let close = handle.close_signal();

        let session_id = {
            let mut state = self.shared.lock().await;
            let session_id = self.allocate_session_id(&state.driver)?;
            state.outbox.insert(session_id, handle);

            if let Err(e) = state.apply(ServerEvent::ConnectionAccepted { session_id }) {
                state.outbox.remove(session_id);
                return Err(e.into());
            }

            // Registered after close_all ran: close ourselves
            if self.shutdown.is_triggered() {
                close.notify_one();
            }
            session_id
        };

        tracing::debug!(session_id, %peer, "Session opened");

        let (reader, writer) = tokio::io::split(stream);
        let mut writer_task = tokio::spawn(write_outbound(
            session_id,
            writer,
            outbound,
            self.limits.write_timeout,
            Arc::clone(&close),
        ));

        let outcome = self.read_inbound(session_id, reader, &close).await;
        let reason = match &outcome {
            Ok(reason) => (*reason).to_string(),
            Err(e) => e.to_string(),
        };

        {
            let mut state = self.shared.lock().await;
            state.outbox.remove(session_id);
            if let Err(e) =
                state.apply(ServerEvent::ConnectionClosed { session_id, reason: reason.clone() })
            {
                tracing::warn!(session_id, error = %e, "Session cleanup failed");
            }
        }

        // Dropping the queue lets the writer flush what is left
        if tokio::time::timeout(self.limits.write_timeout, &mut writer_task).await.is_err() {
            writer_task.abort();
        }

        tracing::debug!(session_id, %peer, reason = %reason, "Session ended");
        outcome.map(|_| ())
    }

    /// Read, frame and dispatch inbound messages.
    ///
    /// Returns the close reason, or a transport error.
    async fn read_inbound<R>(
        &self,
        session_id: u64,
        mut reader: R,
        close: &Notify,
    ) -> Result<&'static str, ServerError>
    where
        R: AsyncRead + Unpin,
    {
        let mut framer = JsonFramer::new(self.limits.max_message_size);
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let n = tokio::select! {
                read = reader.read(&mut buf) => read?,
                () = close.notified() => return Ok("closed by server"),
            };

            if n == 0 {
                return Ok("peer closed");
            }

            framer.extend(&buf[..n]);

            while let Some(frame) = framer.next_frame() {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::debug!(session_id, error = %e, "Dropped unterminated document");
                        continue;
                    },
                };

                let message = match ClientMessage::decode(&frame) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::debug!(session_id, error = %e, "Dropped invalid message");
                        continue;
                    },
                };

                let mut state = self.shared.lock().await;
                if let Err(e) = state.apply(ServerEvent::MessageReceived { session_id, message }) {
                    tracing::warn!(session_id, error = %e, "Message processing error");
                }

                if !state.driver.has_session(session_id) {
                    return Ok("evicted");
                }
            }
        }
    }

    /// Draw an unused, non-zero session ID.
    ///
    /// Runs under the relay lock, so the number of draws is capped.
    fn allocate_session_id(&self, driver: &ServerDriver<E>) -> Result<u64, ServerError> {
        for _ in 0..MAX_SESSION_ID_ATTEMPTS {
            let candidate = self.env.random_u64();
            if candidate != 0 && !driver.has_session(candidate) {
                return Ok(candidate);
            }
        }
        Err(ServerError::Internal(format!(
            "no free session id after {MAX_SESSION_ID_ATTEMPTS} draws"
        )))
    }
}

/// Drain a session's queue onto the socket.
///
/// Any write error or timeout ends the task and signals the reader to close.
/// When the queue is dropped the write half is shut down cleanly.
async fn write_outbound<W>(
    session_id: u64,
    mut writer: W,
    mut outbound: mpsc::Receiver<Bytes>,
    write_timeout: Duration,
    close: Arc<Notify>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(bytes) = outbound.recv().await {
        match tokio::time::timeout(write_timeout, writer.write_all(&bytes)).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => {
                tracing::debug!(session_id, error = %e, "Write failed");
                close.notify_one();
                return;
            },
            Err(_) => {
                tracing::warn!(session_id, ?write_timeout, "Write timed out");
                close.notify_one();
                return;
            },
        }
    }

    if let Err(e) = writer.shutdown().await {
        tracing::debug!(session_id, error = %e, "Write half shutdown failed");
    }
}

/// Production Roomrelay server.
///
/// Wraps a [`Relay`] with the TCP transport and system environment.
pub struct Server {
    /// Bound TCP listener
    transport: TcpTransport,
    /// Connection runtime
    relay: Relay<SystemEnv>,
    /// Grace period for connections on shutdown
    shutdown_grace: Duration,
}

impl Server {
    /// Validate the configuration and bind the listener.
    pub async fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let transport = TcpTransport::bind(&config.bind_address).await?;
        let relay = Relay::new(SystemEnv::new(), &config);

        Ok(Self { transport, relay, shutdown_grace: config.shutdown_grace })
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.transport.local_addr()?)
    }

    /// Handle that stops [`Server::run`].
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.relay.shutdown_handle()
    }

    /// The runtime, for inspection.
    pub fn relay(&self) -> &Relay<SystemEnv> {
        &self.relay
    }

    /// Run until shutdown is triggered.
    pub async fn run(self) -> Result<(), ServerError> {
        let Self { transport, relay, shutdown_grace } = self;
        relay.run(transport, shutdown_grace).await
    }
}
