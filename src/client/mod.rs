//! Tunnel client
//!
//! Spawns one control channel per claimed tunnel and keeps them running
//! until shutdown. All broker traffic goes through the configured
//! transport; only the hop to the local forwarded service is plain TCP.

mod control_channel;
mod proxy_channel;

pub use control_channel::ControlChannel;
pub use proxy_channel::run_proxy_channel;

use crate::config::{ClientConfig, Config, TransportType};
use crate::transport::{AddrMaybeCached, TcpTransport, Transport};
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, info_span, Instrument};

/// The tunnel client, generic over the broker transport
pub struct Client<T: Transport> {
    config: ClientConfig,
    transport: Arc<T>,
}

impl<T: Transport> Client<T> {
    /// Create a client from its configuration
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = Arc::new(
            T::new(&config.transport).with_context(|| "Failed to create client transport")?,
        );
        Ok(Client { config, transport })
    }

    /// Run all control channels until `shutdown_rx` fires
    ///
    /// The channels themselves never give up; only shutdown stops them.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<bool>) -> Result<()> {
        let heartbeat_interval = self.config.heartbeat_interval();

        let mut tasks = Vec::with_capacity(self.config.tunnels.len());
        for tunnel in &self.config.tunnels {
            let channel = ControlChannel::new(
                AddrMaybeCached::new(&self.config.remote_addr),
                tunnel.clone(),
                self.transport.clone(),
                heartbeat_interval,
            );
            let span = info_span!("control", tunnel = %tunnel.name);
            tasks.push(tokio::spawn(channel.run().instrument(span)));
        }
        info!(
            "Client running with {} tunnel(s) against {}",
            self.config.tunnels.len(),
            self.config.remote_addr
        );

        let _ = shutdown_rx.recv().await;
        info!("Client shutting down");

        for task in &tasks {
            task.abort();
        }
        Ok(())
    }
}

/// Run a tunnel client from a loaded configuration
pub async fn run_client(config: Config, shutdown_rx: broadcast::Receiver<bool>) -> Result<()> {
    let mut client_config = config
        .client
        .ok_or_else(|| anyhow!("Configuration has no [client] section"))?;

    // The transport reads the shared secret from its own config
    client_config.transport.secret = client_config.secret.clone();

    match client_config.transport.transport_type {
        TransportType::Tcp => {
            let client = Client::<TcpTransport>::new(client_config)?;
            client.run(shutdown_rx).await
        }
        TransportType::Noise => {
            #[cfg(feature = "noise")]
            {
                let client = Client::<crate::transport::NoiseTransport>::new(client_config)?;
                client.run(shutdown_rx).await
            }
            #[cfg(not(feature = "noise"))]
            {
                anyhow::bail!("Noise transport requires the 'noise' feature")
            }
        }
    }
}
