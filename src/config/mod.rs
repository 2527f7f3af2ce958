//! Configuration module for Tunnelrat
//!
//! This module provides configuration types and parsing for the broker
//! server and the tunnel client.

mod client;
mod server;
mod transport;

pub use client::{ClientConfig, ClientTunnelConfig};
pub use server::{ServerConfig, TunnelConfig};
pub use transport::{NoiseConfig, TcpConfig, TransportConfig, TransportType};

use crate::error::TunnelratError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration structure
///
/// A single file may carry both sections; the CLI subcommand selects
/// which one is used.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Broker server configuration
    pub server: Option<ServerConfig>,
    /// Tunnel client configuration
    pub client: Option<ClientConfig>,
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

    parse_config(&content)
}

/// Parse configuration from a TOML string
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse configuration")?;

    if let Some(server) = &config.server {
        server
            .validate()
            .map_err(|e| TunnelratError::Config(e.to_string()))?;
    }
    if let Some(client) = &config.client {
        client
            .validate()
            .map_err(|e| TunnelratError::Config(e.to_string()))?;
    }

    Ok(config)
}
