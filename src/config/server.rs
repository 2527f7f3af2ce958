//! Server configuration types

use super::TransportConfig;
use crate::helper::DEFAULT_HEARTBEAT_INTERVAL_SECS;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

fn default_heartbeat_interval() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_SECS
}

/// Broker server configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    /// Control-plane bind address, shared by all tunnels
    /// (e.g., "0.0.0.0:2333")
    pub bind_addr: String,

    /// Shared secret for the encrypted transport
    #[serde(default)]
    pub secret: Option<String>,

    /// Transport configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Expected client heartbeat interval in seconds; a tunnel is marked
    /// offline after twice this long without a ping
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,

    /// Registered tunnels
    #[serde(default)]
    pub tunnels: Vec<TunnelConfig>,
}

/// One registered tunnel
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TunnelConfig {
    /// Unique tunnel name presented by the client in HELLO
    pub name: String,

    /// Public listen port for this tunnel
    pub port: u16,

    /// Cap on proxy-connection duration in seconds, 0 = unbounded
    #[serde(default)]
    pub max_proxy_lifetime: u64,
}

impl TunnelConfig {
    /// The lifetime cap as a duration, `None` when unbounded
    pub fn proxy_lifetime(&self) -> Option<Duration> {
        if self.max_proxy_lifetime == 0 {
            None
        } else {
            Some(Duration::from_secs(self.max_proxy_lifetime))
        }
    }
}

impl ServerConfig {
    /// The heartbeat interval as a duration
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval == 0 {
            bail!("heartbeat_interval must be greater than zero");
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

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1:2333".to_string(),
            secret: None,
            transport: TransportConfig::default(),
            heartbeat_interval: default_heartbeat_interval(),
            tunnels: vec![TunnelConfig {
                name: "web".to_string(),
                port: 8080,
                max_proxy_lifetime: 0,
            }],
        }
    }

    #[test]
    fn test_validate_ok() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_heartbeat() {
        let mut config = base_config();
        config.heartbeat_interval = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        let mut config = base_config();
        config.tunnels[0].name = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_long_name() {
        let mut config = base_config();
        config.tunnels[0].name = "x".repeat(256);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_names() {
        let mut config = base_config();
        config.tunnels.push(TunnelConfig {
            name: "web".to_string(),
            port: 8081,
            max_proxy_lifetime: 0,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_proxy_lifetime_zero_is_unbounded() {
        let tunnel = TunnelConfig {
            name: "web".to_string(),
            port: 8080,
            max_proxy_lifetime: 0,
        };
        assert!(tunnel.proxy_lifetime().is_none());

        let tunnel = TunnelConfig {
            max_proxy_lifetime: 600,
            ..tunnel
        };
        assert_eq!(tunnel.proxy_lifetime(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_heartbeat_interval_duration() {
        let config = base_config();
        assert_eq!(
            config.heartbeat_interval(),
            Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS)
        );
    }
}
