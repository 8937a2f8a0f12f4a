//! Scripted relay client for tests.
//!
//! Speaks the wire protocol over any byte stream (Tokio TCP, turmoil TCP, an
//! in-memory duplex) and exposes blocking-style helpers so test bodies read
//! like the conversation they exercise.

use std::{collections::VecDeque, io, net::SocketAddr, time::Duration};

use roomrelay_proto::{ClientMessage, JsonFramer, ServerMessage};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Test client over an arbitrary byte stream.
#[derive(Debug)]
pub struct RelayClient<S> {
    stream: S,
    framer: JsonFramer,
    pending: VecDeque<ServerMessage>,
    buf: Vec<u8>,
}

impl RelayClient<tokio::net::TcpStream> {
    /// Connect over real TCP.
    pub async fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = tokio::net::TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

impl<S> RelayClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an established stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            framer: JsonFramer::default(),
            pending: VecDeque::new(),
            buf: vec![0u8; 4096],
        }
    }

    /// Send one message.
    pub async fn send(&mut self, message: &ClientMessage) -> io::Result<()> {
        let bytes = message.encode().map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.send_raw(&bytes).await
    }

    /// Send bytes exactly as given.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await
    }

    /// Wait for the next message from the relay.
    ///
    /// Fails with `UnexpectedEof` once the relay closes the connection.
    pub async fn recv(&mut self) -> io::Result<ServerMessage> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Ok(message);
            }

            let n = self.stream.read(&mut self.buf).await?;
            if n == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }

            self.framer.extend(&self.buf[..n]);
            while let Some(frame) = self.framer.next_frame() {
                let frame = frame.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                let message = ServerMessage::decode(&frame)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                self.pending.push_back(message);
            }
        }
    }

    /// Wait up to `timeout` for the next message. `None` on timeout.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> io::Result<Option<ServerMessage>> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Wait for the next message of the given wire type, skipping others.
    pub async fn recv_type(&mut self, message_type: &str) -> io::Result<ServerMessage> {
        loop {
            let message = self.recv().await?;
            if message.message_type() == message_type {
                return Ok(message);
            }
        }
    }

    /// Whether the relay closes the connection within `timeout`.
    ///
    /// Messages arriving in the meantime are discarded.
    pub async fn closed_within(&mut self, timeout: Duration) -> bool {
        let closed = tokio::time::timeout(timeout, async {
            while self.recv().await.is_ok() {}
        })
        .await;
        closed.is_ok()
    }

    /// Create a room and return its code.
    pub async fn create_room(&mut self, username: &str) -> io::Result<String> {
        self.send(&ClientMessage::CreateRoom { username: Some(username.to_string()) }).await?;
        match self.recv().await? {
            ServerMessage::RoomCreated { room_code, .. } => Ok(room_code),
            other => Err(unexpected("room_created", &other)),
        }
    }

    /// Ask to join a room and return the relay's reply.
    pub async fn join_room(&mut self, room_code: &str, username: &str) -> io::Result<ServerMessage> {
        self.send(&ClientMessage::JoinRoom {
            room_code: room_code.to_string(),
            username: Some(username.to_string()),
        })
        .await?;
        self.recv().await
    }

    /// Send chat text to the current room.
    pub async fn chat(&mut self, text: &str) -> io::Result<()> {
        self.send(&ClientMessage::ChatMessage { message: text.to_string() }).await
    }

    /// Close the write half, telling the relay we are gone.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }

    /// The underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

fn unexpected(expected: &str, got: &ServerMessage) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("expected {expected}, got {}: {got:?}", got.message_type()),
    )
}
