//! Client configuration types

use super::TransportConfig;
use crate::helper::DEFAULT_HEARTBEAT_INTERVAL_SECS;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

fn default_heartbeat_interval() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_SECS
}

/// Tunnel client configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClientConfig {
    /// Broker address (e.g., "broker.example.com:2333")
    pub remote_addr: String,

    /// Shared secret for the encrypted transport
    #[serde(default)]
    pub secret: Option<String>,

    /// Transport configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Heartbeat interval in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,

    /// Tunnels to claim; each gets its own control channel
    #[serde(default)]
    pub tunnels: Vec<ClientTunnelConfig>,
}

/// One claimed tunnel
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClientTunnelConfig {
    /// Tunnel name to present in HELLO
    pub name: String,

    /// Public port the broker exposes for this tunnel (informational)
    #[serde(default)]
    pub port: u16,

    /// Local port the forwarded service listens on
    pub forward_port: u16,

    /// Cap on proxy-connection duration in seconds, 0 = unbounded
    #[serde(default)]
    pub max_proxy_lifetime: u64,
}

impl ClientTunnelConfig {
    /// The lifetime cap as a duration, `None` when unbounded
    pub fn proxy_lifetime(&self) -> Option<Duration> {
        if self.max_proxy_lifetime == 0 {
            None
        } else {
            Some(Duration::from_secs(self.max_proxy_lifetime))
        }
    }
}

impl ClientConfig {
    /// The heartbeat interval as a duration
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval == 0 {
            bail!("heartbeat_interval must be greater than zero");
        }
        if self.tunnels.is_empty() {
            bail!("Client configuration requires at least one tunnel");
        }

        let mut names = HashSet::new();
        for tunnel in &self.tunnels {
            if tunnel.name.is_empty() {
                bail!("Tunnel name must not be empty");
            }
            if tunnel.name.len() > 255 {
                bail!("Tunnel name '{}' exceeds 255 bytes", tunnel.name);
            }
            if !names.insert(tunnel.name.as_str()) {
                bail!("Duplicate tunnel name '{}'", tunnel.name);
            }
        }

        Ok(())
    }
}
