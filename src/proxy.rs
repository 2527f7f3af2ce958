//! Byte-pump proxy
//!
//! Splices two live connections bidirectionally until either direction
//! finishes, errors out, or an optional lifetime cap elapses. Every exit
//! path shuts both streams down, so a pairing never leaks a socket.

use crate::error::TunnelratError;
use anyhow::Result;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::trace;

/// Splice `a` and `b` together until one direction finishes
///
/// Runs both copy directions concurrently and returns as soon as either
/// one terminates with EOF or an error; the result is the byte count (or
/// error) of that earlier-finishing direction. With a lifetime cap set, a
/// session still running when the cap elapses is torn down and reported
/// as [`TunnelratError::Timeout`]. Any exit is terminal for the pairing;
/// callers never resume it.
pub async fn pump<A, B>(a: A, b: B, lifetime: Option<Duration>) -> Result<u64>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    let splice = async {
        tokio::select! {
            result = tokio::io::copy(&mut a_read, &mut b_write) => result,
            result = tokio::io::copy(&mut b_read, &mut a_write) => result,
        }
    };

    let result = match lifetime {
        Some(cap) => match timeout(cap, splice).await {
            Ok(copied) => copied.map_err(Into::into),
            Err(_) => Err(TunnelratError::Timeout(format!(
                "Proxy lifetime of {:?} exceeded",
                cap
            ))
            .into()),
        },
        None => splice.await.map_err(Into::into),
    };

    // Close both sides regardless of how the splice ended; shutting down
    // an already-closed stream is a no-op error we ignore.
    let _ = a_write.shutdown().await;
    let _ = b_write.shutdown().await;

    if let Ok(bytes) = &result {
        trace!("Pump finished after {} bytes", bytes);
    }

    result
}
