//! Control-port connection handling
//!
//! Every inbound connection on the control port starts with one frame that
//! says what it is: HELLO turns it into a long-lived control channel with
//! heartbeats, PROXY hands it over to the tunnel's mailbox for pairing.

use super::registry::{Registry, Tunnel};
use crate::error::TunnelratError;
use crate::helper::DEFAULT_CONNECT_TIMEOUT_SECS;
use crate::protocol::{self, Flag, HeartbeatReply, HEARTBEAT_PING, HELLO_ACK, HELLO_NACK};
use crate::transport::StreamDyn;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

/// Backlog of proxy requests buffered towards one control channel
const PROXY_REQUEST_QUEUE: usize = 32;

/// Dispatch one accepted control-port connection
///
/// Reads the opening frame (bounded by a connect timeout so a silent
/// connection cannot pin the task) and routes it. Errors returned here are
/// per-connection; the accept loop logs and moves on.
pub async fn handle_connection<S>(
    stream: S,
    peer: SocketAddr,
    registry: Arc<Registry>,
    heartbeat_interval: Duration,
) -> Result<()>
where
    S: StreamDyn + 'static,
{
    let mut stream = stream;

    let frame = timeout(
        Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        protocol::read_frame(&mut stream),
    )
    .await
    .map_err(|_| TunnelratError::Timeout(format!("No opening frame from {}", peer)))?
    .with_context(|| format!("Failed to read opening frame from {}", peer))?;

    let name = frame.name()?.to_string();

    match frame.flag {
        Flag::Hello => handle_control_channel(stream, peer, &name, registry, heartbeat_interval).await,
        Flag::Proxy => handle_proxy_channel(stream, peer, &name, registry).await,
    }
}

/// Run a control channel to completion
///
/// Acknowledges the HELLO, marks the tunnel online, then serves heartbeats
/// and proxy requests until the client goes quiet or the connection drops.
/// The liveness window is twice the heartbeat interval; a client that
/// misses two consecutive pings is presumed dead.
async fn handle_control_channel<S>(
    mut stream: S,
    peer: SocketAddr,
    name: &str,
    registry: Arc<Registry>,
    heartbeat_interval: Duration,
) -> Result<()>
where
    S: StreamDyn,
{
    let tunnel = match registry.get(name).await {
        Some(tunnel) => tunnel,
        None => {
            let _ = stream.write_u8(HELLO_NACK).await;
            let _ = stream.shutdown().await;
            return Err(TunnelratError::UnknownTunnel(name.to_string()).into());
        }
    };

    stream
        .write_u8(HELLO_ACK)
        .await
        .with_context(|| format!("Failed to acknowledge HELLO from {}", peer))?;
    stream.flush().await?;

    // Queued, not coalesced: every waiting public peer gets its own
    // proxy request forwarded to the client
    let (request_tx, mut request_rx) = mpsc::channel::<()>(PROXY_REQUEST_QUEUE);
    tunnel.set_online(peer.to_string(), request_tx.clone()).await;
    info!("Tunnel '{}' online, client {}", name, peer);

    let result = control_loop(&mut stream, &tunnel, &mut request_rx, heartbeat_interval).await;

    tunnel.set_offline_if_owner(&request_tx).await;
    let _ = stream.shutdown().await;
    info!("Tunnel '{}' control channel from {} closed", name, peer);

    result
}

async fn control_loop<S>(
    stream: &mut S,
    tunnel: &Arc<Tunnel>,
    request_rx: &mut mpsc::Receiver<()>,
    heartbeat_interval: Duration,
) -> Result<()>
where
    S: StreamDyn,
{
    let liveness_window = heartbeat_interval * 2;
    // Only a heartbeat ping extends this deadline; proxy requests and any
    // other traffic must not keep a silent client alive
    let mut deadline = Instant::now() + liveness_window;

    loop {
        tokio::select! {
            byte = stream.read_u8() => {
                match byte {
                    Ok(HEARTBEAT_PING) => {
                        deadline = Instant::now() + liveness_window;
                        HeartbeatReply::Ack.write_to(stream).await?;
                    }
                    Ok(other) => {
                        return Err(TunnelratError::Protocol(
                            crate::error::ProtocolError::UnknownHeartbeat(other),
                        )
                        .into());
                    }
                    Err(e) => {
                        debug!("Control channel for '{}' read error: {}", tunnel.name(), e);
                        return Ok(());
                    }
                }
            }
            _ = sleep_until(deadline) => {
                warn!(
                    "Tunnel '{}' missed its liveness window ({:?})",
                    tunnel.name(),
                    liveness_window
                );
                return Ok(());
            }
            request = request_rx.recv() => {
                // The sender half lives in the tunnel; recv cannot fail here
                if request.is_some() {
                    debug!("Requesting proxy connection for '{}'", tunnel.name());
                    HeartbeatReply::ProxyRequested.write_to(stream).await?;
                }
            }
        }
    }
}

/// Deposit a PROXY connection into its tunnel's mailbox
///
/// A connection for an unknown tunnel is closed without a reply. The
/// mailbox holds at most one connection; a stale unconsumed one is
/// replaced and thereby closed.
async fn handle_proxy_channel<S>(
    stream: S,
    peer: SocketAddr,
    name: &str,
    registry: Arc<Registry>,
) -> Result<()>
where
    S: StreamDyn + 'static,
{
    let tunnel = match registry.get(name).await {
        Some(tunnel) => tunnel,
        None => {
            return Err(TunnelratError::UnknownTunnel(name.to_string()).into());
        }
    };

    let evicted = tunnel.mailbox().put(Box::new(stream)).await;
    if evicted {
        debug!("Replaced stale proxy connection for '{}'", name);
    }
    debug!("Proxy connection for '{}' deposited by {}", name, peer);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{write_frame, Frame};

    fn peer() -> SocketAddr {
        "127.0.0.1:45000".parse().unwrap()
    }

    async fn registry_with(name: &str) -> Arc<Registry> {
        let registry = Arc::new(Registry::new());
        registry
            .insert(Tunnel::new(name.to_string(), 8080, None))
            .await
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_hello_unknown_tunnel_is_nacked() {
        let registry = registry_with("web").await;
        let (mut client, server) = tokio::io::duplex(1024);

        let handler = tokio::spawn(handle_connection(
            server,
            peer(),
            registry,
            Duration::from_secs(1),
        ));

        write_frame(&mut client, &Frame::hello("missing"))
            .await
            .unwrap();

        assert_eq!(client.read_u8().await.unwrap(), HELLO_NACK);

        // Connection is closed after the nack
        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);

        let err = handler.await.unwrap().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TunnelratError>(),
            Some(TunnelratError::UnknownTunnel(name)) if name == "missing"
        ));
    }

    #[tokio::test]
    async fn test_hello_known_tunnel_goes_online() {
        let registry = registry_with("web").await;
        let (mut client, server) = tokio::io::duplex(1024);

        let handler = tokio::spawn(handle_connection(
            server,
            peer(),
            registry.clone(),
            Duration::from_secs(1),
        ));

        write_frame(&mut client, &Frame::hello("web")).await.unwrap();
        assert_eq!(client.read_u8().await.unwrap(), HELLO_ACK);

        let tunnel = registry.get("web").await.unwrap();
        // Give the handler a beat to record the transition
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(tunnel.is_online().await);
        assert_eq!(tunnel.client_addr().await, peer().to_string());

        // Heartbeat ping gets a plain ack back
        client.write_u8(HEARTBEAT_PING).await.unwrap();
        assert_eq!(client.read_u8().await.unwrap(), HeartbeatReply::Ack.to_byte());

        // Hanging up takes the tunnel offline
        drop(client);
        handler.await.unwrap().unwrap();
        assert!(!tunnel.is_online().await);
    }

    #[tokio::test]
    async fn test_silent_client_expires_liveness_window() {
        let registry = registry_with("web").await;
        let (mut client, server) = tokio::io::duplex(1024);

        let handler = tokio::spawn(handle_connection(
            server,
            peer(),
            registry.clone(),
            Duration::from_millis(50),
        ));

        write_frame(&mut client, &Frame::hello("web")).await.unwrap();
        assert_eq!(client.read_u8().await.unwrap(), HELLO_ACK);

        // Send nothing; the handler must give up within ~2x the interval
        let result = timeout(Duration::from_millis(500), handler).await;
        result.expect("handler did not expire").unwrap().unwrap();

        let tunnel = registry.get("web").await.unwrap();
        assert!(!tunnel.is_online().await);
    }

    #[tokio::test]
    async fn test_proxy_requests_do_not_extend_liveness_window() {
        let registry = registry_with("web").await;
        let (mut client, server) = tokio::io::duplex(4096);

        let handler = tokio::spawn(handle_connection(
            server,
            peer(),
            registry.clone(),
            Duration::from_millis(100),
        ));

        write_frame(&mut client, &Frame::hello("web")).await.unwrap();
        assert_eq!(client.read_u8().await.unwrap(), HELLO_ACK);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let tunnel = registry.get("web").await.unwrap();

        // The client never pings again, but public peers keep arriving
        // faster than the liveness window
        let requester = tokio::spawn({
            let tunnel = tunnel.clone();
            async move {
                while tunnel.request_proxy().await {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        });

        // Silence must still expire the claim within ~2x the interval
        let result = timeout(Duration::from_secs(1), handler).await;
        result
            .expect("proxy requests kept the silent client alive")
            .unwrap()
            .unwrap();
        assert!(!tunnel.is_online().await);

        requester.await.unwrap();
    }

    #[tokio::test]
    async fn test_proxy_request_is_pushed_to_client() {
        let registry = registry_with("web").await;
        let (mut client, server) = tokio::io::duplex(1024);

        let _handler = tokio::spawn(handle_connection(
            server,
            peer(),
            registry.clone(),
            Duration::from_secs(5),
        ));

        write_frame(&mut client, &Frame::hello("web")).await.unwrap();
        assert_eq!(client.read_u8().await.unwrap(), HELLO_ACK);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let tunnel = registry.get("web").await.unwrap();
        assert!(tunnel.request_proxy().await);

        let reply = HeartbeatReply::read_from(&mut client).await.unwrap();
        assert_eq!(reply, HeartbeatReply::ProxyRequested);
    }

    #[tokio::test]
    async fn test_proxy_frame_lands_in_mailbox() {
        let registry = registry_with("web").await;
        let (mut client, server) = tokio::io::duplex(1024);

        let handler = tokio::spawn(handle_connection(
            server,
            peer(),
            registry.clone(),
            Duration::from_secs(1),
        ));

        write_frame(&mut client, &Frame::proxy("web")).await.unwrap();
        handler.await.unwrap().unwrap();

        let tunnel = registry.get("web").await.unwrap();
        assert!(tunnel.mailbox().is_occupied().await);
    }

    #[tokio::test]
    async fn test_proxy_frame_for_unknown_tunnel_is_dropped() {
        let registry = registry_with("web").await;
        let (mut client, server) = tokio::io::duplex(1024);

        let handler = tokio::spawn(handle_connection(
            server,
            peer(),
            registry.clone(),
            Duration::from_secs(1),
        ));

        write_frame(&mut client, &Frame::proxy("missing"))
            .await
            .unwrap();
        let err = handler.await.unwrap().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TunnelratError>(),
            Some(TunnelratError::UnknownTunnel(_))
        ));

        // No reply, connection just closes
        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_garbage_opening_frame_fails() {
        let registry = registry_with("web").await;
        let (mut client, server) = tokio::io::duplex(1024);

        let handler = tokio::spawn(handle_connection(
            server,
            peer(),
            registry,
            Duration::from_secs(1),
        ));

        client.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
        client.flush().await.unwrap();

        assert!(handler.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_takeover_replaces_older_control_channel() {
        let registry = registry_with("web").await;

        let (mut first, first_server) = tokio::io::duplex(1024);
        let first_handler = tokio::spawn(handle_connection(
            first_server,
            "127.0.0.1:45001".parse().unwrap(),
            registry.clone(),
            Duration::from_secs(5),
        ));
        write_frame(&mut first, &Frame::hello("web")).await.unwrap();
        assert_eq!(first.read_u8().await.unwrap(), HELLO_ACK);

        let (mut second, second_server) = tokio::io::duplex(1024);
        let _second_handler = tokio::spawn(handle_connection(
            second_server,
            "127.0.0.1:45002".parse().unwrap(),
            registry.clone(),
            Duration::from_secs(5),
        ));
        write_frame(&mut second, &Frame::hello("web")).await.unwrap();
        assert_eq!(second.read_u8().await.unwrap(), HELLO_ACK);

        tokio::time::sleep(Duration::from_millis(20)).await;

        // Dropping the first connection must not take the new owner offline
        drop(first);
        first_handler.await.unwrap().unwrap();

        let tunnel = registry.get("web").await.unwrap();
        assert!(tunnel.is_online().await);
        assert_eq!(tunnel.client_addr().await, "127.0.0.1:45002");
    }
}
