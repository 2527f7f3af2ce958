//! Single-slot proxy-connection mailbox
//!
//! The sole coupling point between a tunnel's control-handling task and
//! its public-accept task. A PROXY connection is deposited here and picked
//! up by whichever public connection is waiting; at most one connection is
//! ever buffered, and a newer arrival evicts (and thereby closes) a stale
//! unconsumed one.

use crate::transport::StreamDyn;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::{timeout_at, Instant};
use tracing::debug;

/// Boxed proxy-side connection held in the mailbox
pub type ProxyConn = Box<dyn StreamDyn>;

/// Mutex-protected single-slot handoff with explicit replace semantics
#[derive(Debug, Default)]
pub struct ProxyMailbox {
    slot: Mutex<Option<ProxyConn>>,
    notify: Notify,
}

impl ProxyMailbox {
    /// Create an empty mailbox
    pub fn new() -> Self {
        ProxyMailbox {
            slot: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Deposit a proxy connection, replacing any stale one
    ///
    /// Returns true when a stale unconsumed connection was evicted; the
    /// evicted connection is dropped here, which closes it.
    pub async fn put(&self, conn: ProxyConn) -> bool {
        let evicted = {
            let mut slot = self.slot.lock().await;
            slot.replace(conn).is_some()
        };

        if evicted {
            debug!("Evicted stale proxy connection from mailbox");
        }

        self.notify.notify_one();
        evicted
    }

    /// Take the buffered connection, waiting up to `wait` for one to arrive
    ///
    /// First-writer/first-reader semantics: it does not matter whether the
    /// deposit or this call happens first.
    pub async fn take(&self, wait: Duration) -> Option<ProxyConn> {
        let deadline = Instant::now() + wait;

        loop {
            if let Some(conn) = self.slot.lock().await.take() {
                return Some(conn);
            }

            if timeout_at(deadline, self.notify.notified()).await.is_err() {
                // Deadline hit; one last check in case a deposit raced us
                return self.slot.lock().await.take();
            }
        }
    }

    /// Whether a connection is currently buffered
    pub async fn is_occupied(&self) -> bool {
        self.slot.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn conn_pair() -> (ProxyConn, tokio::io::DuplexStream) {
        let (near, far) = tokio::io::duplex(64);
        (Box::new(near), far)
    }

    #[tokio::test]
    async fn test_put_then_take() {
        let mailbox = ProxyMailbox::new();

        let (conn, _far) = conn_pair();
        assert!(!mailbox.put(conn).await);
        assert!(mailbox.is_occupied().await);

        let taken = mailbox.take(Duration::from_millis(100)).await;
        assert!(taken.is_some());
        assert!(!mailbox.is_occupied().await);
    }

    #[tokio::test]
    async fn test_take_then_put() {
        let mailbox = std::sync::Arc::new(ProxyMailbox::new());

        let depositor = mailbox.clone();
        let deposit_task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let (conn, far) = conn_pair();
            depositor.put(conn).await;
            far
        });

        // The waiter arrives first; the deposit wakes it up
        let taken = mailbox.take(Duration::from_secs(1)).await;
        assert!(taken.is_some());

        deposit_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_replace_closes_stale_connection() {
        let mailbox = ProxyMailbox::new();

        let (first, mut first_far) = conn_pair();
        let (second, _second_far) = conn_pair();

        assert!(!mailbox.put(first).await);
        assert!(mailbox.put(second).await);

        // The evicted connection was dropped, so its peer reads EOF
        let mut buf = [0u8; 1];
        let n = first_far.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);

        // Exactly one connection remains buffered
        assert!(mailbox.take(Duration::from_millis(50)).await.is_some());
        assert!(mailbox.take(Duration::from_millis(50)).await.is_none());
    }

    #[tokio::test]
    async fn test_take_times_out_when_empty() {
        let mailbox = ProxyMailbox::new();

        let started = std::time::Instant::now();
        let taken = mailbox.take(Duration::from_millis(50)).await;
        assert!(taken.is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_stale_notify_does_not_yield_empty_slot() {
        let mailbox = ProxyMailbox::new();

        let (conn, _far) = conn_pair();
        mailbox.put(conn).await;
        assert!(mailbox.take(Duration::from_millis(10)).await.is_some());

        // The earlier notify permit must not make a later take spin forever
        // or return a phantom connection
        assert!(mailbox.take(Duration::from_millis(10)).await.is_none());
    }
}
