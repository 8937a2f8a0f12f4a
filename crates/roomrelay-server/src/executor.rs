//! Action executor and outbound fan-out.
//!
//! Each connected session owns a bounded outbound queue drained by its own
//! writer task. The executor never waits on a socket: it encodes each message
//! once and offers the bytes to every recipient queue with `try_send`. A queue
//! that is full or closed marks its session as failed; failed sessions are
//! evicted (queue dropped, connection signalled to close) and their departure
//! is fed back through the driver so the rest of the room hears `user_left`.
//! One stuck client therefore costs the others nothing.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use bytes::Bytes;
use roomrelay_core::Environment;
use tokio::sync::{Notify, mpsc, mpsc::error::TrySendError};

use crate::driver::{LogLevel, ServerAction, ServerDriver, ServerEvent};

/// Why a message could not be queued for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// No outbound queue is registered for the session
    #[error("session has no outbound queue")]
    NotConnected,

    /// The session's queue is at capacity
    #[error("outbound queue full")]
    QueueFull,

    /// The session's writer has gone away
    #[error("outbound queue closed")]
    Closed,
}

/// Write side of one connection, as seen by the executor.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Bytes>,
    close: Arc<Notify>,
}

impl SessionHandle {
    /// Create a handle with a fresh queue of `capacity` messages.
    ///
    /// Returns the handle and the receiving end for the writer task.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, close: Arc::new(Notify::new()) }, rx)
    }

    /// Signal the connection's tasks watch for shutdown.
    pub fn close_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.close)
    }

    /// Queue bytes without waiting.
    pub fn deliver(&self, bytes: Bytes) -> Result<(), DeliveryError> {
        self.tx.try_send(bytes).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::QueueFull,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Ask the connection to close.
    ///
    /// The permit is stored, so a connection that is not currently waiting
    /// still sees it on its next wait.
    pub fn close(&self) {
        self.close.notify_one();
    }
}

/// Outbound queues of all connected sessions.
#[derive(Debug, Default)]
pub struct Outbox {
    sessions: HashMap<u64, SessionHandle>,
}

impl Outbox {
    /// Create an empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session's handle, returning any handle it replaces.
    pub fn insert(&mut self, session_id: u64, handle: SessionHandle) -> Option<SessionHandle> {
        self.sessions.insert(session_id, handle)
    }

    /// Unregister a session. Dropping the returned handle lets the writer
    /// finish once the queue is drained.
    pub fn remove(&mut self, session_id: u64) -> Option<SessionHandle> {
        self.sessions.remove(&session_id)
    }

    /// Session has a registered queue.
    pub fn contains(&self, session_id: u64) -> bool {
        self.sessions.contains_key(&session_id)
    }

    /// Number of registered queues.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// No queues are registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Queue bytes for one session without waiting.
    pub fn deliver(&self, session_id: u64, bytes: Bytes) -> Result<(), DeliveryError> {
        self.sessions.get(&session_id).ok_or(DeliveryError::NotConnected)?.deliver(bytes)
    }

    /// Ask one session's connection to close. Returns `false` if unknown.
    pub fn close(&self, session_id: u64) -> bool {
        match self.sessions.get(&session_id) {
            Some(handle) => {
                handle.close();
                true
            },
            None => false,
        }
    }

    /// Ask every connection to close. Returns how many were signalled.
    pub fn close_all(&self) -> usize {
        for handle in self.sessions.values() {
            handle.close();
        }
        self.sessions.len()
    }
}

/// What happened while executing a batch of actions.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Messages successfully queued
    pub delivered: usize,
    /// Sessions evicted because a delivery failed
    pub evicted: Vec<u64>,
}

/// Execute driver actions against the outbox.
///
/// Broadcast recipients are read from the driver when the action runs.
/// Delivery failures are collected per action and evicted before the next
/// action, so every broadcast sees a consistent member set and follow-up
/// `user_left` notices go out in the same pass.
pub fn execute_actions<E: Environment>(
    driver: &mut ServerDriver<E>,
    outbox: &mut Outbox,
    actions: Vec<ServerAction<E::Instant>>,
) -> ExecutionReport {
    let mut report = ExecutionReport::default();
    let mut queue: VecDeque<_> = actions.into();
    let mut failed = Vec::new();

    while let Some(action) = queue.pop_front() {
        match action {
            ServerAction::SendToSession { session_id, message } => {
                let bytes = match message.encode() {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::error!("Failed to encode {}: {}", message.message_type(), e);
                        continue;
                    },
                };

                match outbox.deliver(session_id, bytes) {
                    Ok(()) => report.delivered += 1,
                    Err(e) => failed.push((session_id, e)),
                }
            },

            ServerAction::BroadcastToRoom { room_code, message, exclude_session } => {
                let bytes = match message.encode() {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::error!("Failed to encode {}: {}", message.message_type(), e);
                        continue;
                    },
                };

                let recipients: Vec<u64> = driver
                    .sessions_in_room(room_code)
                    .filter(|session_id| Some(*session_id) != exclude_session)
                    .collect();

                for session_id in recipients {
                    match outbox.deliver(session_id, bytes.clone()) {
                        Ok(()) => report.delivered += 1,
                        Err(e) => failed.push((session_id, e)),
                    }
                }
            },

            ServerAction::CloseConnection { session_id, reason } => {
                tracing::info!(session_id, reason = %reason, "Closing connection");
                outbox.close(session_id);
            },

            ServerAction::Log { level, message, .. } => match level {
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
        }

        for (session_id, error) in failed.drain(..) {
            let handle = outbox.remove(session_id);
            if handle.is_none() && !driver.has_session(session_id) {
                // Already gone
                continue;
            }

            tracing::warn!(session_id, error = %error, "Evicting session");
            if let Some(handle) = handle {
                handle.close();
            }
            report.evicted.push(session_id);

            match driver.process_event(ServerEvent::ConnectionClosed {
                session_id,
                reason: format!("delivery failed: {error}"),
            }) {
                Ok(actions) => queue.extend(actions),
                Err(e) => tracing::warn!(session_id, error = %e, "Eviction failed"),
            }
        }
    }

    report
}
