//! Frame codec
//!
//! Reads and writes the framed control messages described in
//! [`types`](super::types). Decoding failures are reported to the caller,
//! which decides whether to close the connection; there are no retries at
//! this layer.

use super::types::{Flag, Frame, FRAME_MAGIC, MAX_FRAME_PAYLOAD};
use crate::error::ProtocolError;
use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Write one frame to the stream
pub async fn write_frame<W: AsyncWrite + Unpin>(conn: &mut W, frame: &Frame) -> Result<()> {
    conn.write_all(FRAME_MAGIC)
        .await
        .with_context(|| "Failed to write frame magic")?;
    conn.write_u8(frame.flag as u8)
        .await
        .with_context(|| "Failed to write frame flag")?;
    conn.write_u32_le(frame.payload.len() as u32)
        .await
        .with_context(|| "Failed to write frame length")?;
    conn.write_all(&frame.payload)
        .await
        .with_context(|| "Failed to write frame payload")?;
    conn.flush().await.with_context(|| "Failed to flush frame")?;

    trace!("Wrote {:?} frame, {} payload bytes", frame.flag, frame.payload.len());
    Ok(())
}

/// Read exactly one frame from the stream
///
/// Blocks until a full frame is available. A magic mismatch (garbage
/// traffic on the control port) yields [`ProtocolError::BadMagic`]; a
/// stream that closes mid-frame yields [`ProtocolError::IncompleteFrame`].
/// The length field is capped at [`MAX_FRAME_PAYLOAD`] and rejected before
/// any allocation.
pub async fn read_frame<R: AsyncRead + Unpin>(conn: &mut R) -> Result<Frame> {
    let mut magic = [0u8; FRAME_MAGIC.len()];
    read_exact_or_incomplete(conn, &mut magic).await?;
    if &magic != FRAME_MAGIC {
        return Err(ProtocolError::BadMagic.into());
    }

    let mut header = [0u8; 5];
    read_exact_or_incomplete(conn, &mut header).await?;
    let flag = Flag::try_from(header[0])?;
    let len = u32::from_le_bytes([header[1], header[2], header[3], header[4]]);

    if len > MAX_FRAME_PAYLOAD {
        return Err(ProtocolError::Oversized {
            len,
            max: MAX_FRAME_PAYLOAD,
        }
        .into());
    }

    let mut payload = vec![0u8; len as usize];
    read_exact_or_incomplete(conn, &mut payload).await?;

    trace!("Read {:?} frame, {} payload bytes", flag, len);
    Ok(Frame {
        flag,
        payload: Bytes::from(payload),
    })
}

/// read_exact that maps EOF onto the protocol taxonomy
async fn read_exact_or_incomplete<R: AsyncRead + Unpin>(
    conn: &mut R,
    buf: &mut [u8],
) -> Result<()> {
    match conn.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(ProtocolError::IncompleteFrame.into())
        }
        Err(e) => Err(e).with_context(|| "Failed to read frame bytes"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hello_frame_roundtrip() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let original = Frame::hello("test-tunnel");
        write_frame(&mut client, &original).await.unwrap();

        let received = read_frame(&mut server).await.unwrap();
        assert_eq!(original, received);
        assert_eq!(received.name().unwrap(), "test-tunnel");
    }

    #[tokio::test]
    async fn test_proxy_frame_roundtrip() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let original = Frame::proxy("test-tunnel");
        write_frame(&mut client, &original).await.unwrap();

        let received = read_frame(&mut server).await.unwrap();
        assert_eq!(original, received);
    }

    #[tokio::test]
    async fn test_empty_payload_roundtrip() {
        let (mut client, mut server) = tokio::io::duplex(64);

        let original = Frame {
            flag: Flag::Hello,
            payload: Bytes::new(),
        };
        write_frame(&mut client, &original).await.unwrap();

        let received = read_frame(&mut server).await.unwrap();
        assert_eq!(received.payload.len(), 0);
        assert_eq!(received.flag, Flag::Hello);
    }

    #[tokio::test]
    async fn test_payload_at_cap_roundtrip() {
        let (mut client, mut server) = tokio::io::duplex(4 * 1024 * 1024);

        let original = Frame {
            flag: Flag::Proxy,
            payload: Bytes::from(vec![0xAB; MAX_FRAME_PAYLOAD as usize]),
        };

        let write_task = tokio::spawn(async move {
            write_frame(&mut client, &original).await.unwrap();
            original
        });

        let received = read_frame(&mut server).await.unwrap();
        let original = write_task.await.unwrap();
        assert_eq!(original.payload.len(), received.payload.len());
    }

    #[tokio::test]
    async fn test_bad_magic_is_protocol_error() {
        let (mut client, mut server) = tokio::io::duplex(64);

        use tokio::io::AsyncWriteExt;
        client.write_all(b"GET / HT").await.unwrap();
        client.write_all(&[1, 0, 0, 0, 0]).await.unwrap();

        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProtocolError>(),
            Some(ProtocolError::BadMagic)
        ));
    }

    #[tokio::test]
    async fn test_oversized_length_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);

        use tokio::io::AsyncWriteExt;
        client.write_all(FRAME_MAGIC).await.unwrap();
        client.write_u8(1).await.unwrap();
        // Announce far more than the cap; no payload follows
        client.write_u32_le(u32::MAX).await.unwrap();

        let err = read_frame(&mut server).await.unwrap_err();
        match err.downcast_ref::<ProtocolError>() {
            Some(ProtocolError::Oversized { len, max }) => {
                assert_eq!(*len, u32::MAX);
                assert_eq!(*max, MAX_FRAME_PAYLOAD);
            }
            other => panic!("Expected Oversized, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_flag_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);

        use tokio::io::AsyncWriteExt;
        client.write_all(FRAME_MAGIC).await.unwrap();
        client.write_u8(0x7f).await.unwrap();
        client.write_u32_le(0).await.unwrap();

        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProtocolError>(),
            Some(ProtocolError::UnknownFlag(0x7f))
        ));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_incomplete() {
        let (mut client, mut server) = tokio::io::duplex(64);

        use tokio::io::AsyncWriteExt;
        client.write_all(FRAME_MAGIC).await.unwrap();
        client.write_u8(1).await.unwrap();
        client.write_u32_le(10).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);

        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProtocolError>(),
            Some(ProtocolError::IncompleteFrame)
        ));
    }

    #[tokio::test]
    async fn test_immediate_eof_is_incomplete() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);

        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProtocolError>(),
            Some(ProtocolError::IncompleteFrame)
        ));
    }
}
