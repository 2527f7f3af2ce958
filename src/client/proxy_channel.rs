//! Proxy dial-back
//!
//! When the broker signals that a public peer is waiting, the client dials
//! a fresh connection to the broker, announces it with a PROXY frame, then
//! connects to the local forwarded service and splices the two together.

use crate::config::ClientTunnelConfig;
use crate::protocol::{write_frame, Frame};
use crate::proxy::pump;
use crate::transport::{AddrMaybeCached, SocketOpts, Transport};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Open one proxy connection and run it to completion
///
/// A local service that refuses the connection is logged and swallowed;
/// the forwarded service being down must not tear down the tunnel. The
/// broker-side connection is dropped in that case, which the broker treats
/// like any other closed pairing.
pub async fn run_proxy_channel<T: Transport>(
    transport: Arc<T>,
    remote_addr: AddrMaybeCached,
    tunnel: ClientTunnelConfig,
) -> Result<()> {
    let mut remote = transport
        .connect(&remote_addr)
        .await
        .with_context(|| format!("Failed to open proxy connection to {}", remote_addr.addr()))?;
    T::hint(&remote, SocketOpts::for_proxy_channel());

    write_frame(&mut remote, &Frame::proxy(&tunnel.name))
        .await
        .with_context(|| "Failed to announce proxy connection")?;

    let local = match TcpStream::connect(("127.0.0.1", tunnel.forward_port)).await {
        Ok(local) => local,
        Err(e) => {
            warn!(
                "Local service on port {} is unreachable: {}",
                tunnel.forward_port, e
            );
            return Ok(());
        }
    };
    if let Err(e) = SocketOpts::for_proxy_channel().apply(&local) {
        debug!("Failed to set local socket options: {}", e);
    }

    debug!(
        "Proxying '{}' to local port {}",
        tunnel.name, tunnel.forward_port
    );

    match pump(remote, local, tunnel.proxy_lifetime()).await {
        Ok(bytes) => debug!("Proxy session for '{}' moved {} bytes", tunnel.name, bytes),
        Err(e) => debug!("Proxy session for '{}' ended: {:#}", tunnel.name, e),
    }

    Ok(())
}
