//! Transport module for Tunnelrat
//!
//! This module provides the transport layer abstraction and implementations
//! for different protocols (TCP, Noise). The broker and client only ever see
//! ordered byte streams; cipher and handshake details live entirely here.

mod addr;
#[cfg(feature = "noise")]
mod noise;
mod tcp;

pub use addr::AddrMaybeCached;
#[cfg(feature = "noise")]
pub use noise::NoiseTransport;
pub use tcp::TcpTransport;

use crate::config::{TcpConfig, TransportConfig};
use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Debug;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};

/// Socket options for configuring connections
#[derive(Debug, Clone)]
pub struct SocketOpts {
    /// Enable TCP_NODELAY
    pub nodelay: bool,
    /// TCP keepalive timeout
    pub keepalive_secs: Option<u64>,
    /// TCP keepalive interval
    pub keepalive_interval: Option<u64>,
}

impl Default for SocketOpts {
    fn default() -> Self {
        SocketOpts {
            nodelay: true,
            keepalive_secs: Some(20),
            keepalive_interval: Some(8),
        }
    }
}

impl SocketOpts {
    /// Create socket options for control channels (longer keepalive)
    pub fn for_control_channel() -> Self {
        SocketOpts {
            nodelay: true,
            keepalive_secs: Some(30),
            keepalive_interval: Some(10),
        }
    }

    /// Create socket options for proxy channels (optimized for throughput)
    pub fn for_proxy_channel() -> Self {
        SocketOpts {
            nodelay: true,
            keepalive_secs: Some(20),
            keepalive_interval: Some(8),
        }
    }

    /// Create socket options from TCP config
    pub fn from_tcp_config(config: &TcpConfig) -> Self {
        SocketOpts {
            nodelay: config.nodelay,
            keepalive_secs: Some(config.keepalive_secs),
            keepalive_interval: Some(config.keepalive_interval),
        }
    }

    /// Apply socket options to a TCP stream
    pub fn apply(&self, stream: &TcpStream) -> std::io::Result<()> {
        stream.set_nodelay(self.nodelay)?;

        if let (Some(timeout), Some(interval)) = (self.keepalive_secs, self.keepalive_interval) {
            let socket = socket2::SockRef::from(stream);
            let keepalive = socket2::TcpKeepalive::new()
                .with_time(Duration::from_secs(timeout))
                .with_interval(Duration::from_secs(interval));
            socket.set_tcp_keepalive(&keepalive)?;
        }

        Ok(())
    }
}

/// Transport trait for different connection types
///
/// Implementations dial out (client side) and listen/accept (broker side),
/// returning streams that implement AsyncRead + AsyncWrite. Accepting is
/// split from handshaking so that accept-loop error handling stays at the
/// socket level while a failed handshake only affects its own connection.
#[async_trait]
pub trait Transport: Debug + Send + Sync + 'static {
    /// The stream type produced by this transport
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + Sync + Debug + 'static;

    /// Create a new transport instance from configuration
    fn new(config: &TransportConfig) -> Result<Self>
    where
        Self: Sized;

    /// Apply socket hints/options to a connection
    fn hint(conn: &Self::Stream, opts: SocketOpts);

    /// Bind the listening socket for inbound connections
    async fn bind(&self, addr: &str) -> Result<TcpListener>;

    /// Accept one raw inbound connection
    async fn accept(&self, listener: &TcpListener) -> std::io::Result<(TcpStream, SocketAddr)> {
        listener.accept().await
    }

    /// Upgrade an accepted connection (responder-side handshake)
    async fn handshake(&self, stream: TcpStream) -> Result<Self::Stream>;

    /// Connect to a remote address (initiator-side handshake included)
    async fn connect(&self, addr: &AddrMaybeCached) -> Result<Self::Stream>;
}

/// Dynamic stream trait for boxed streams
pub trait StreamDyn: AsyncRead + AsyncWrite + Unpin + Send + Sync + Debug {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + Sync + Debug> StreamDyn for T {}
