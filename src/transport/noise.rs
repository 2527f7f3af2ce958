//! Noise protocol transport implementation
//!
//! Encrypted streams via the Noise protocol framework. With the default
//! `Noise_NNpsk0` pattern the pre-shared key is derived from the shared
//! secret by hashing it with SHA-256, so both sides only need the secret;
//! NK-style patterns with explicit static keys are also accepted.

use super::{AddrMaybeCached, SocketOpts, Transport};
use crate::config::{NoiseConfig, TransportConfig};
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha2::{Digest, Sha256};
use snowstorm::NoiseStream;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

/// Noise transport for encrypted connections
#[derive(Debug)]
pub struct NoiseTransport {
    /// Noise pattern (e.g., "Noise_NNpsk0_25519_ChaChaPoly_BLAKE2s")
    pattern: String,
    /// Pre-shared key derived from the shared secret
    psk: Option<[u8; 32]>,
    /// Local private key (optional, for patterns with a local static)
    local_private_key: Option<Vec<u8>>,
    /// Remote public key (optional, for patterns with a remote static)
    remote_public_key: Option<Vec<u8>>,
    /// Socket options to apply to connections
    socket_opts: SocketOpts,
    /// Connection timeout
    connect_timeout: Duration,
}

impl NoiseTransport {
    /// Create a new Noise transport with the given configuration
    pub fn with_config(
        config: &NoiseConfig,
        secret: Option<&str>,
        socket_opts: SocketOpts,
    ) -> Result<Self> {
        let psk = secret.map(|s| {
            let digest = Sha256::new().chain_update(s.as_bytes()).finalize();
            let mut key = [0u8; 32];
            key.copy_from_slice(&digest);
            key
        });

        if psk.is_none() && config.pattern.contains("psk") {
            anyhow::bail!(
                "Noise pattern '{}' requires a shared secret",
                config.pattern
            );
        }

        let local_private_key = match &config.local_private_key {
            Some(key) => Some(
                BASE64
                    .decode(key)
                    .with_context(|| "Failed to decode local private key from base64")?,
            ),
            None => None,
        };

        let remote_public_key = match &config.remote_public_key {
            Some(key) => Some(
                BASE64
                    .decode(key)
                    .with_context(|| "Failed to decode remote public key from base64")?,
            ),
            None => None,
        };

        Ok(NoiseTransport {
            pattern: config.pattern.clone(),
            psk,
            local_private_key,
            remote_public_key,
            socket_opts,
            connect_timeout: Duration::from_secs(10),
        })
    }

    fn builder(&self) -> Result<snowstorm::Builder<'_>> {
        let mut builder = snowstorm::Builder::new(self.pattern.parse()?);

        if let Some(ref psk) = self.psk {
            builder = builder.psk(0, psk);
        }
        if let Some(ref key) = self.local_private_key {
            builder = builder.local_private_key(key);
        }
        if let Some(ref key) = self.remote_public_key {
            builder = builder.remote_public_key(key);
        }

        Ok(builder)
    }
}

#[async_trait]
impl Transport for NoiseTransport {
    type Stream = NoiseStream<TcpStream>;

    fn new(config: &TransportConfig) -> Result<Self> {
        let noise_config = config.noise.clone().unwrap_or_default();
        let socket_opts = SocketOpts::from_tcp_config(&config.tcp);
        NoiseTransport::with_config(&noise_config, config.secret.as_deref(), socket_opts)
    }

    fn hint(_conn: &Self::Stream, _opts: SocketOpts) {
        // TCP options were applied before the handshake
    }

    async fn bind(&self, addr: &str) -> Result<TcpListener> {
        TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))
    }

    async fn handshake(&self, stream: TcpStream) -> Result<Self::Stream> {
        self.socket_opts.apply(&stream)?;

        let responder = self.builder()?.build_responder()?;
        let noise_stream = NoiseStream::handshake(stream, responder)
            .await
            .with_context(|| "Noise responder handshake failed")?;

        Ok(noise_stream)
    }

    async fn connect(&self, addr: &AddrMaybeCached) -> Result<Self::Stream> {
        let resolved = addr.resolve().await?;

        let tcp_stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(resolved))
            .await
            .with_context(|| format!("Connection timeout to {}", addr.addr()))?
            .with_context(|| format!("Failed to connect to {}", addr.addr()))?;

        // Apply socket options before the Noise handshake
        self.socket_opts.apply(&tcp_stream)?;

        let initiator = self.builder()?.build_initiator()?;
        let noise_stream = NoiseStream::handshake(tcp_stream, initiator)
            .await
            .with_context(|| "Noise initiator handshake failed")?;

        tracing::debug!("Noise connection established to {}", resolved);

        Ok(noise_stream)
    }
}
