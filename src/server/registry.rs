//! Tunnel registry
//!
//! Maps tunnel names to their server-side state. The registry is an
//! explicit object owned by the [`Server`](super::Server), populated once
//! at startup; tunnels live for the process lifetime and only their
//! online/client fields toggle as clients come and go.

use super::mailbox::ProxyMailbox;
use crate::error::TunnelratError;
use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

/// Mutable per-tunnel fields, guarded by one lock
#[derive(Debug, Default)]
struct TunnelInner {
    /// Whether a client currently owns this tunnel
    online: bool,
    /// Last known client remote address, empty when offline
    client_addr: String,
    /// Signal channel into the owning control-channel task
    request_tx: Option<mpsc::Sender<()>>,
}

/// Server-side state of one registered tunnel
#[derive(Debug)]
pub struct Tunnel {
    name: String,
    port: u16,
    max_proxy_lifetime: Option<Duration>,
    inner: RwLock<TunnelInner>,
    proxy_connections: AtomicUsize,
    mailbox: ProxyMailbox,
}

impl Tunnel {
    /// Create a tunnel in the offline state
    pub fn new(name: String, port: u16, max_proxy_lifetime: Option<Duration>) -> Self {
        Tunnel {
            name,
            port,
            max_proxy_lifetime,
            inner: RwLock::new(TunnelInner::default()),
            proxy_connections: AtomicUsize::new(0),
            mailbox: ProxyMailbox::new(),
        }
    }

    /// Tunnel name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Public listen port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Cap on proxy-connection duration, `None` when unbounded
    pub fn max_proxy_lifetime(&self) -> Option<Duration> {
        self.max_proxy_lifetime
    }

    /// The single-slot proxy handoff for this tunnel
    pub fn mailbox(&self) -> &ProxyMailbox {
        &self.mailbox
    }

    /// Whether a client currently owns this tunnel
    pub async fn is_online(&self) -> bool {
        self.inner.read().await.online
    }

    /// Last known client address
    pub async fn client_addr(&self) -> String {
        self.inner.read().await.client_addr.clone()
    }

    /// Mark the tunnel online, owned by the client at `client_addr`
    ///
    /// `request_tx` is the channel the public-accept task uses to ask the
    /// control channel for a proxy connection.
    pub async fn set_online(&self, client_addr: String, request_tx: mpsc::Sender<()>) {
        let mut inner = self.inner.write().await;
        inner.online = true;
        inner.client_addr = client_addr;
        inner.request_tx = Some(request_tx);
    }

    /// Mark the tunnel offline only if `request_tx` still owns it
    ///
    /// A newer control connection may have taken the tunnel over; the
    /// older connection's teardown must not knock the new owner offline.
    pub async fn set_offline_if_owner(&self, request_tx: &mpsc::Sender<()>) {
        let mut inner = self.inner.write().await;
        let owned = match &inner.request_tx {
            Some(tx) => tx.same_channel(request_tx),
            None => false,
        };
        if owned {
            inner.online = false;
            inner.client_addr.clear();
            inner.request_tx = None;
        }
    }

    /// Ask the owning client for a fresh proxy connection
    ///
    /// Returns false when the tunnel is offline. Requests are queued, one
    /// per waiting public peer, so none is silently dropped; the lock is
    /// released before the send so a full queue never blocks the registry.
    pub async fn request_proxy(&self) -> bool {
        let tx = {
            let inner = self.inner.read().await;
            match &inner.request_tx {
                Some(tx) => tx.clone(),
                None => return false,
            }
        };

        tx.send(()).await.is_ok()
    }

    /// Bracket a pump session for the gauge
    pub fn proxy_started(&self) {
        self.proxy_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Counterpart of [`Tunnel::proxy_started`]
    pub fn proxy_finished(&self) {
        self.proxy_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Live proxy-connection count
    pub fn proxy_connections(&self) -> usize {
        self.proxy_connections.load(Ordering::Relaxed)
    }

    /// Read-only snapshot of this tunnel's state
    pub async fn snapshot(&self) -> TunnelSnapshot {
        let inner = self.inner.read().await;
        TunnelSnapshot {
            name: self.name.clone(),
            port: self.port,
            online: inner.online,
            client_addr: inner.client_addr.clone(),
            proxy_connections: self.proxy_connections(),
        }
    }
}

/// Read-only view of one tunnel for status reporting
///
/// Serializable so an external HTTP status handler can render it directly.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TunnelSnapshot {
    /// Tunnel name
    pub name: String,
    /// Public listen port
    pub port: u16,
    /// Whether a client currently owns the tunnel
    pub online: bool,
    /// Last known client remote address, empty when offline
    pub client_addr: String,
    /// Live proxy-connection count
    pub proxy_connections: usize,
}

/// Registry of all tunnels, keyed by name
///
/// Read-mostly after startup; the map itself only changes during
/// [`Server::bind`](super::Server::bind).
#[derive(Debug, Default)]
pub struct Registry {
    tunnels: RwLock<HashMap<String, Arc<Tunnel>>>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Registry {
            tunnels: RwLock::new(HashMap::new()),
        }
    }

    /// Register a tunnel; fails on a duplicate name
    pub async fn insert(&self, tunnel: Tunnel) -> Result<Arc<Tunnel>> {
        let mut tunnels = self.tunnels.write().await;
        if tunnels.contains_key(tunnel.name()) {
            return Err(TunnelratError::DuplicateTunnel(tunnel.name().to_string()).into());
        }

        let tunnel = Arc::new(tunnel);
        tunnels.insert(tunnel.name().to_string(), tunnel.clone());
        Ok(tunnel)
    }

    /// Look up a tunnel by name
    pub async fn get(&self, name: &str) -> Option<Arc<Tunnel>> {
        self.tunnels.read().await.get(name).cloned()
    }

    /// Number of registered tunnels
    pub async fn len(&self) -> usize {
        self.tunnels.read().await.len()
    }

    /// Whether no tunnels are registered
    pub async fn is_empty(&self) -> bool {
        self.tunnels.read().await.is_empty()
    }

    /// Thread-safe list of current tunnel states, for status reporting
    pub async fn snapshot(&self) -> Vec<TunnelSnapshot> {
        let tunnels: Vec<Arc<Tunnel>> = self.tunnels.read().await.values().cloned().collect();

        let mut snapshots = Vec::with_capacity(tunnels.len());
        for tunnel in tunnels {
            snapshots.push(tunnel.snapshot().await);
        }
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }
}
