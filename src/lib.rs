//! # Tunnelrat - Reverse Tunnel Broker
//!
//! Tunnelrat exposes services running behind NAT on a public broker. The
//! broker listens on one public TCP port per registered tunnel; a client
//! behind NAT holds a persistent control connection open and, whenever a
//! public peer shows up, dials back with a fresh proxy connection that the
//! broker splices to the waiting peer.
//!
//! ## Features
//!
//! - **Named Tunnels**: Clients claim tunnels by name over a framed HELLO
//! - **Dial-Back Proxying**: No inbound connectivity to the client needed
//! - **Heartbeat Liveness**: A tunnel goes offline after two missed pings
//! - **Relentless Reconnect**: The client retries forever, never giving up
//! - **Pluggable Transport**: Plain TCP or Noise-encrypted control traffic
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tunnelrat::config::load_config;
//! use tunnelrat::server::run_server;
//! use tokio::sync::broadcast;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config("tunnelrat.toml")?;
//!     let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
//!
//!     run_server(config, shutdown_rx).await
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Public Peer -> Broker (public port) ----+
//!                                         | splice
//! Local Service <- Client <- Broker (control port, dial-back)
//! ```
//!
//! The broker never speaks the forwarded protocol; after pairing it only
//! pumps bytes. Only control-port traffic goes through the configured
//! transport; public peers always speak raw TCP.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod client;
pub mod config;
pub mod error;
pub mod helper;
pub mod protocol;
pub mod proxy;
pub mod server;
pub mod transport;

// Re-export commonly used items
pub use client::run_client;
pub use config::{load_config, Config};
pub use error::{ProtocolError, TunnelratError};
pub use server::run_server;

/// Version of the Tunnelrat library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
