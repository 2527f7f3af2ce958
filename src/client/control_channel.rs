//! Client control channel
//!
//! One long-lived connection per claimed tunnel: it presents the HELLO,
//! keeps the claim alive with heartbeats, and reacts to proxy requests by
//! spawning dial-back tasks. The channel reconnects forever; a broker that
//! is down for an hour just means an hour of retries.

use super::proxy_channel::run_proxy_channel;
use crate::config::ClientTunnelConfig;
use crate::error::TunnelratError;
use crate::helper::RetrySchedule;
use crate::protocol::{write_frame, Frame, HeartbeatReply, HEARTBEAT_PING, HELLO_ACK, HELLO_NACK};
use crate::transport::{AddrMaybeCached, SocketOpts, Transport};
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// How long to wait for the broker to acknowledge a HELLO
const HELLO_ACK_TIMEOUT: Duration = Duration::from_secs(3);

/// Control channel for one tunnel
pub struct ControlChannel<T: Transport> {
    remote_addr: AddrMaybeCached,
    tunnel: ClientTunnelConfig,
    transport: Arc<T>,
    heartbeat_interval: Duration,
    retry: RetrySchedule,
}

impl<T: Transport> ControlChannel<T> {
    /// Create a control channel; it does nothing until [`run`](Self::run)
    pub fn new(
        remote_addr: AddrMaybeCached,
        tunnel: ClientTunnelConfig,
        transport: Arc<T>,
        heartbeat_interval: Duration,
    ) -> Self {
        ControlChannel {
            remote_addr,
            tunnel,
            transport,
            heartbeat_interval,
            retry: RetrySchedule::default(),
        }
    }

    /// Override the reconnect schedule
    pub fn with_retry(mut self, retry: RetrySchedule) -> Self {
        self.retry = retry;
        self
    }

    /// Run the channel forever, reconnecting on every failure
    ///
    /// A cached DNS result is discarded before each retry so that a broker
    /// that moved behind a new address is eventually found.
    pub async fn run(mut self) {
        loop {
            if let Err(e) = self.run_once().await {
                warn!("Control channel for '{}': {:#}", self.tunnel.name, e);
            }

            self.remote_addr.clear_cache().await;
            let delay = self.retry.next_delay();
            debug!(
                "Reconnecting control channel for '{}' in {:?}",
                self.tunnel.name, delay
            );
            sleep(delay).await;
        }
    }

    /// One connect-claim-heartbeat session
    ///
    /// Returns only on failure; a healthy session runs until the
    /// connection breaks or the broker goes quiet for two heartbeat
    /// intervals.
    async fn run_once(&mut self) -> Result<()> {
        let mut conn = self
            .transport
            .connect(&self.remote_addr)
            .await
            .with_context(|| format!("Failed to connect to {}", self.remote_addr.addr()))?;
        T::hint(&conn, SocketOpts::for_control_channel());

        write_frame(&mut conn, &Frame::hello(&self.tunnel.name))
            .await
            .with_context(|| "Failed to send HELLO")?;

        let ack = timeout(HELLO_ACK_TIMEOUT, conn.read_u8())
            .await
            .map_err(|_| {
                TunnelratError::Timeout(format!(
                    "No HELLO acknowledgement within {:?}",
                    HELLO_ACK_TIMEOUT
                ))
            })?
            .with_context(|| "Connection closed before HELLO acknowledgement")?;

        match ack {
            HELLO_ACK => {}
            HELLO_NACK => bail!("Broker rejected tunnel '{}'", self.tunnel.name),
            other => bail!("Unexpected HELLO reply byte 0x{:02x}", other),
        }

        info!("Claimed tunnel '{}'", self.tunnel.name);
        self.retry.reset();

        let liveness_window = self.heartbeat_interval * 2;
        let (mut rd, mut wr) = tokio::io::split(conn);

        let mut ticker = interval(self.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if last_seen.elapsed() > liveness_window {
                        bail!(
                            "Broker silent for {:?}, presuming the channel dead",
                            last_seen.elapsed()
                        );
                    }
                    wr.write_u8(HEARTBEAT_PING)
                        .await
                        .with_context(|| "Failed to send heartbeat")?;
                    wr.flush().await?;
                }
                reply = HeartbeatReply::read_from(&mut rd) => {
                    last_seen = Instant::now();
                    match reply.with_context(|| "Failed to read heartbeat reply")? {
                        HeartbeatReply::Ack => {
                            trace!("Heartbeat acknowledged for '{}'", self.tunnel.name);
                        }
                        HeartbeatReply::ProxyRequested => {
                            debug!("Proxy requested for '{}'", self.tunnel.name);
                            let transport = self.transport.clone();
                            let remote_addr = self.remote_addr.clone();
                            let tunnel = self.tunnel.clone();
                            tokio::spawn(async move {
                                if let Err(e) =
                                    run_proxy_channel(transport, remote_addr, tunnel).await
                                {
                                    error!("Proxy channel failed: {:#}", e);
                                }
                            });
                        }
                    }
                }
            }
        }
    }
}
