//! TCP transport.
//!
//! The relay speaks raw TCP: no TLS, no framing below the JSON layer. The
//! [`Listener`] trait is the seam between the accept loop and the socket
//! implementation so the same loop runs over Tokio sockets in production and
//! over simulated sockets in deterministic tests.

use std::{future::Future, io, net::SocketAddr};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
};

use crate::error::ServerError;

/// Source of inbound byte-stream connections.
pub trait Listener: Send + Sync + 'static {
    /// Connection type yielded by `accept`.
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Wait for the next inbound connection.
    fn accept(&self) -> impl Future<Output = io::Result<(Self::Stream, SocketAddr)>> + Send;

    /// Address the listener is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// TCP transport using Tokio.
#[derive(Debug)]
pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    /// Create and bind a new TCP listener.
    pub async fn bind(address: &str) -> Result<Self, ServerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid bind address '{address}': {e}")))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Transport(format!("failed to bind {addr}: {e}")))?;

        tracing::info!("TCP transport bound to {}", addr);

        Ok(Self { listener })
    }
}

impl Listener for TcpTransport {
    type Stream = TcpStream;

    /// Accept a new connection with Nagle disabled.
    ///
    /// Chat traffic is many small writes; batching them only adds latency.
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = self.listener.accept().await?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("set_nodelay failed for {}: {}", peer, e);
        }
        Ok((stream, peer))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transport_binds_ephemeral_port() {
        let transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr().unwrap();
        assert_ne!(addr.port(), 0, "Should have assigned a port");
    }

    #[tokio::test]
    async fn transport_rejects_invalid_address() {
        let result = TcpTransport::bind("invalid:address:format").await;
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[tokio::test]
    async fn transport_accepts_connections() {
        let transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr().unwrap();

        let client = tokio::spawn(async move { TcpStream::connect(addr).await });
        let (stream, peer) = transport.accept().await.unwrap();

        let client = client.await.unwrap().unwrap();
        assert_eq!(peer, client.local_addr().unwrap());
        assert!(stream.nodelay().unwrap());
    }
}
