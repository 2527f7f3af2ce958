//! TCP transport implementation
//!
//! Plain, unencrypted streams. Intended for tests and trusted networks;
//! production deployments should use the Noise transport.

use super::{AddrMaybeCached, SocketOpts, Transport};
use crate::config::TransportConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

/// TCP transport for plain connections
#[derive(Debug, Clone)]
pub struct TcpTransport {
    /// Socket options to apply to connections
    socket_opts: SocketOpts,
    /// Connection timeout
    connect_timeout: Duration,
}

impl TcpTransport {
    /// Create a new TCP transport with default options
    pub fn with_defaults() -> Self {
        TcpTransport {
            socket_opts: SocketOpts::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpStream;

    fn new(config: &TransportConfig) -> Result<Self> {
        let socket_opts = SocketOpts::from_tcp_config(&config.tcp);
        Ok(TcpTransport {
            socket_opts,
            connect_timeout: Duration::from_secs(10),
        })
    }

    fn hint(conn: &Self::Stream, opts: SocketOpts) {
        if let Err(e) = opts.apply(conn) {
            tracing::warn!("Failed to apply socket options: {}", e);
        }
    }

    async fn bind(&self, addr: &str) -> Result<TcpListener> {
        TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))
    }

    async fn handshake(&self, stream: TcpStream) -> Result<Self::Stream> {
        self.socket_opts.apply(&stream)?;
        Ok(stream)
    }

    async fn connect(&self, addr: &AddrMaybeCached) -> Result<Self::Stream> {
        let resolved = addr.resolve().await?;

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(resolved))
            .await
            .with_context(|| format!("Connection timeout to {}", addr.addr()))?
            .with_context(|| format!("Failed to connect to {}", addr.addr()))?;

        self.socket_opts.apply(&stream)?;

        tracing::debug!("TCP connection established to {}", resolved);

        Ok(stream)
    }
}
