//! Protocol type definitions

use crate::error::ProtocolError;
use anyhow::Result;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Fixed magic header opening every framed message
pub const FRAME_MAGIC: &[u8; 8] = b"X-TUNNEL";

/// Maximum accepted frame payload (the length field is otherwise trusted)
pub const MAX_FRAME_PAYLOAD: u32 = 1024 * 1024;

/// Heartbeat ping byte, client to server, sent bare on the control connection
pub const HEARTBEAT_PING: u8 = 0x21;

/// Single-byte acknowledgement for HELLO; also the plain heartbeat reply
pub const HELLO_ACK: u8 = 0x01;

/// Single byte written before closing a rejected HELLO
pub const HELLO_NACK: u8 = 0x00;

/// Byte signalling that a public peer is waiting for a proxy connection
const PROXY_REQUESTED: u8 = 0x02;

/// Message kind carried in the frame flag byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Flag {
    /// Claim a tunnel name on a new control connection
    Hello = 1,
    /// Offer this connection as the proxy side of a pairing
    Proxy = 2,
}

impl TryFrom<u8> for Flag {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Flag::Hello),
            2 => Ok(Flag::Proxy),
            other => Err(ProtocolError::UnknownFlag(other)),
        }
    }
}

/// One framed control message
///
/// Wire form: magic, flag byte, u32 little-endian payload length, payload.
/// The payload is the UTF-8 tunnel name for both message kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message kind
    pub flag: Flag,
    /// Opaque payload
    pub payload: Bytes,
}

impl Frame {
    /// Build a HELLO frame claiming `name`
    pub fn hello(name: &str) -> Self {
        Frame {
            flag: Flag::Hello,
            payload: Bytes::copy_from_slice(name.as_bytes()),
        }
    }

    /// Build a PROXY frame for `name`
    pub fn proxy(name: &str) -> Self {
        Frame {
            flag: Flag::Proxy,
            payload: Bytes::copy_from_slice(name.as_bytes()),
        }
    }

    /// Interpret the payload as a tunnel name
    pub fn name(&self) -> Result<&str> {
        std::str::from_utf8(&self.payload).map_err(|_| anyhow::anyhow!("Tunnel name is not UTF-8"))
    }
}

/// Reply to a heartbeat ping
///
/// Kept as a tagged type rather than raw byte literals so that "cheap
/// liveness check" and "open a proxy connection now" stay unambiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatReply {
    /// Liveness acknowledged, nothing to do
    Ack,
    /// A public peer is waiting; open a proxy connection
    ProxyRequested,
}

impl HeartbeatReply {
    /// Wire byte for this reply
    pub fn to_byte(self) -> u8 {
        match self {
            HeartbeatReply::Ack => HELLO_ACK,
            HeartbeatReply::ProxyRequested => PROXY_REQUESTED,
        }
    }

    /// Write the reply byte to the stream
    pub async fn write_to<W: AsyncWrite + Unpin>(self, writer: &mut W) -> Result<()> {
        writer.write_u8(self.to_byte()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read one reply byte from the stream
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let byte = reader.read_u8().await?;
        Self::try_from(byte).map_err(Into::into)
    }
}

impl TryFrom<u8> for HeartbeatReply {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            HELLO_ACK => Ok(HeartbeatReply::Ack),
            PROXY_REQUESTED => Ok(HeartbeatReply::ProxyRequested),
            other => Err(ProtocolError::UnknownHeartbeat(other)),
        }
    }
}
