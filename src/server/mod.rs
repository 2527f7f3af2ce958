//! Broker server
//!
//! Owns the control-port listener, one public listener per registered
//! tunnel, and the registry that ties them together. Public peers speak
//! raw TCP; only control-port traffic goes through the configured
//! transport.

mod control;
mod mailbox;
mod registry;

pub use mailbox::{ProxyConn, ProxyMailbox};
pub use registry::{Registry, Tunnel, TunnelSnapshot};

use crate::config::{Config, ServerConfig, TransportType, TunnelConfig};
use crate::helper::{is_transient_accept_error, DEFAULT_PROXY_WAIT_SECS};
use crate::proxy::pump;
use crate::transport::{SocketOpts, TcpTransport, Transport};
use anyhow::{anyhow, Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Accept-loop backoff starts here and doubles up to the cap
const ACCEPT_BACKOFF_INITIAL: Duration = Duration::from_millis(100);
const ACCEPT_BACKOFF_CAP: Duration = Duration::from_secs(1);

/// The broker server, generic over the control-port transport
pub struct Server<T: Transport> {
    config: ServerConfig,
    host: String,
    transport: Arc<T>,
    registry: Arc<Registry>,
    control_listener: TcpListener,
    tunnel_listeners: Vec<(Arc<Tunnel>, TcpListener)>,
}

impl<T: Transport> Server<T> {
    /// Bind the control listener and register the configured tunnels
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let transport = Arc::new(
            T::new(&config.transport).with_context(|| "Failed to create server transport")?,
        );

        let control_listener = transport
            .bind(&config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind control port {}", config.bind_addr))?;
        info!("Control port listening on {}", config.bind_addr);

        // Public listeners share the control port's host
        let host = config
            .bind_addr
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .ok_or_else(|| anyhow!("Invalid bind_addr '{}'", config.bind_addr))?;

        let mut server = Server {
            config: config.clone(),
            host,
            transport,
            registry: Arc::new(Registry::new()),
            control_listener,
            tunnel_listeners: Vec::with_capacity(config.tunnels.len()),
        };

        for tunnel_config in &config.tunnels {
            server.add_service(tunnel_config).await?;
        }

        Ok(server)
    }

    /// Register one tunnel and bind its public listener
    ///
    /// Fails on a duplicate name or an unbindable port. Port 0 asks the OS
    /// for a free port; the registry records the port actually bound.
    pub async fn add_service(&mut self, tunnel_config: &TunnelConfig) -> Result<Arc<Tunnel>> {
        let listener = TcpListener::bind(format!("{}:{}", self.host, tunnel_config.port))
            .await
            .with_context(|| {
                format!(
                    "Failed to bind public port {} for tunnel '{}'",
                    tunnel_config.port, tunnel_config.name
                )
            })?;
        let bound_port = listener.local_addr()?.port();

        let tunnel = self
            .registry
            .insert(Tunnel::new(
                tunnel_config.name.clone(),
                bound_port,
                tunnel_config.proxy_lifetime(),
            ))
            .await?;
        info!("Tunnel '{}' listening on port {}", tunnel.name(), bound_port);

        self.tunnel_listeners.push((tunnel.clone(), listener));
        Ok(tunnel)
    }

    /// Address the control listener actually bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.control_listener.local_addr().map_err(Into::into)
    }

    /// The tunnel registry, shared for status reporting
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Run the server until `shutdown_rx` fires
    ///
    /// Spawns one accept loop per public listener and runs the control
    /// accept loop inline. Transient accept errors back off exponentially
    /// up to one second; anything else stops the affected listener.
    pub async fn serve(self, mut shutdown_rx: broadcast::Receiver<bool>) -> Result<()> {
        let mut public_tasks = Vec::with_capacity(self.tunnel_listeners.len());
        for (tunnel, listener) in self.tunnel_listeners {
            let span = info_span!("public", tunnel = %tunnel.name());
            public_tasks.push(tokio::spawn(
                run_public_listener(tunnel, listener).instrument(span),
            ));
        }

        let heartbeat_interval = self.config.heartbeat_interval();
        let mut backoff = ACCEPT_BACKOFF_INITIAL;

        loop {
            tokio::select! {
                accepted = self.transport.accept(&self.control_listener) => {
                    match accepted {
                        Ok((stream, peer)) => {
                            backoff = ACCEPT_BACKOFF_INITIAL;

                            let transport = self.transport.clone();
                            let registry = self.registry.clone();
                            tokio::spawn(async move {
                                match transport.handshake(stream).await {
                                    Ok(conn) => {
                                        if let Err(e) = control::handle_connection(
                                            conn,
                                            peer,
                                            registry,
                                            heartbeat_interval,
                                        )
                                        .await
                                        {
                                            warn!("Control connection from {}: {:#}", peer, e);
                                        }
                                    }
                                    Err(e) => {
                                        warn!("Handshake with {} failed: {:#}", peer, e);
                                    }
                                }
                            });
                        }
                        Err(e) if is_transient_accept_error(&e) => {
                            warn!("Transient accept error, backing off {:?}: {}", backoff, e);
                            sleep(backoff).await;
                            backoff = (backoff * 2).min(ACCEPT_BACKOFF_CAP);
                        }
                        Err(e) => {
                            // Stop accepting control connections but keep the
                            // public listeners serving until shutdown
                            error!("Control listener failed, accepting no new control connections: {}", e);
                            let _ = shutdown_rx.recv().await;
                            info!("Server shutting down");
                            break;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Server shutting down");
                    break;
                }
            }
        }

        for task in &public_tasks {
            task.abort();
        }
        Ok(())
    }
}

/// Accept public connections for one tunnel forever
async fn run_public_listener(tunnel: Arc<Tunnel>, listener: TcpListener) {
    let mut backoff = ACCEPT_BACKOFF_INITIAL;

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                backoff = ACCEPT_BACKOFF_INITIAL;

                let tunnel = tunnel.clone();
                tokio::spawn(async move {
                    handle_public_connection(stream, peer, tunnel).await;
                });
            }
            Err(e) if is_transient_accept_error(&e) => {
                warn!("Transient accept error, backing off {:?}: {}", backoff, e);
                sleep(backoff).await;
                backoff = (backoff * 2).min(ACCEPT_BACKOFF_CAP);
            }
            Err(e) => {
                error!("Public listener for '{}' failed: {}", tunnel.name(), e);
                return;
            }
        }
    }
}

/// Pair one public connection with a proxy connection and pump
///
/// An offline tunnel or a proxy connection that never arrives simply
/// closes the public connection; the public peer is not owed an
/// explanation in-band.
async fn handle_public_connection(public: TcpStream, peer: SocketAddr, tunnel: Arc<Tunnel>) {
    if !tunnel.is_online().await {
        debug!("Rejecting {}: tunnel '{}' is offline", peer, tunnel.name());
        return;
    }

    if !tunnel.request_proxy().await {
        debug!("Rejecting {}: tunnel '{}' went offline", peer, tunnel.name());
        return;
    }

    let proxy = match tunnel
        .mailbox()
        .take(Duration::from_secs(DEFAULT_PROXY_WAIT_SECS))
        .await
    {
        Some(proxy) => proxy,
        None => {
            warn!(
                "No proxy connection for '{}' within {}s, dropping {}",
                tunnel.name(),
                DEFAULT_PROXY_WAIT_SECS,
                peer
            );
            return;
        }
    };

    if let Err(e) = SocketOpts::for_proxy_channel().apply(&public) {
        debug!("Failed to set socket options for {}: {}", peer, e);
    }

    tunnel.proxy_started();
    debug!("Paired {} with a proxy connection for '{}'", peer, tunnel.name());

    let result = pump(public, proxy, tunnel.max_proxy_lifetime()).await;
    tunnel.proxy_finished();

    match result {
        Ok(bytes) => debug!("Session for {} finished after {} bytes", peer, bytes),
        Err(e) => debug!("Session for {} ended: {:#}", peer, e),
    }
}

/// Run a broker server from a loaded configuration
pub async fn run_server(config: Config, shutdown_rx: broadcast::Receiver<bool>) -> Result<()> {
    let mut server_config = config
        .server
        .ok_or_else(|| anyhow!("Configuration has no [server] section"))?;

    // The transport reads the shared secret from its own config
    server_config.transport.secret = server_config.secret.clone();

    match server_config.transport.transport_type {
        TransportType::Tcp => {
            let server = Server::<TcpTransport>::bind(server_config).await?;
            server.serve(shutdown_rx).await
        }
        TransportType::Noise => {
            #[cfg(feature = "noise")]
            {
                let server =
                    Server::<crate::transport::NoiseTransport>::bind(server_config).await?;
                server.serve(shutdown_rx).await
            }
            #[cfg(not(feature = "noise"))]
            {
                anyhow::bail!("Noise transport requires the 'noise' feature")
            }
        }
    }
}
