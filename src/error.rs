//! Error types for Tunnelrat
//!
//! This module defines all custom error types used throughout the application.

use std::io;
use thiserror::Error;

/// Main error type for Tunnelrat operations
#[derive(Error, Debug)]
pub enum TunnelratError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Wire protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// HELLO or PROXY named a tunnel that is not registered
    #[error("Unknown tunnel: {0}")]
    UnknownTunnel(String),

    /// A tunnel with the same name is already registered
    #[error("Duplicate tunnel: {0}")]
    DuplicateTunnel(String),

    /// A bounded wait elapsed (ack wait, heartbeat, proxy lifetime)
    #[error("Timeout: {0}")]
    Timeout(String),
}

/// Wire protocol errors
///
/// All of these are fatal for the connection they occur on and are
/// isolated to that peer; none of them propagate past the owning task.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The 8-byte magic header did not match
    #[error("Invalid frame magic")]
    BadMagic,

    /// The stream closed in the middle of a frame
    #[error("Stream closed mid-frame")]
    IncompleteFrame,

    /// The length field exceeded the payload cap
    #[error("Frame payload too large: {len} bytes (max {max})")]
    Oversized {
        /// Length announced by the peer
        len: u32,
        /// Maximum accepted payload length
        max: u32,
    },

    /// The flag byte is not a known message kind
    #[error("Unknown frame flag: {0:#04x}")]
    UnknownFlag(u8),

    /// A heartbeat reply byte is not a known sentinel
    #[error("Unknown heartbeat byte: {0:#04x}")]
    UnknownHeartbeat(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tunnelrat_error_display() {
        let err = TunnelratError::Config("invalid config".to_string());
        assert_eq!(format!("{}", err), "Configuration error: invalid config");

        let err = TunnelratError::UnknownTunnel("web".to_string());
        assert_eq!(format!("{}", err), "Unknown tunnel: web");

        let err = TunnelratError::DuplicateTunnel("web".to_string());
        assert_eq!(format!("{}", err), "Duplicate tunnel: web");

        let err = TunnelratError::Timeout("ack wait".to_string());
        assert_eq!(format!("{}", err), "Timeout: ack wait");
    }

    #[test]
    fn test_protocol_error_display() {
        assert_eq!(format!("{}", ProtocolError::BadMagic), "Invalid frame magic");
        assert_eq!(
            format!("{}", ProtocolError::IncompleteFrame),
            "Stream closed mid-frame"
        );
        assert_eq!(
            format!(
                "{}",
                ProtocolError::Oversized {
                    len: 2_000_000,
                    max: 1_048_576
                }
            ),
            "Frame payload too large: 2000000 bytes (max 1048576)"
        );
        assert_eq!(
            format!("{}", ProtocolError::UnknownFlag(0x7f)),
            "Unknown frame flag: 0x7f"
        );
        assert_eq!(
            format!("{}", ProtocolError::UnknownHeartbeat(0xff)),
            "Unknown heartbeat byte: 0xff"
        );
    }

    #[test]
    fn test_tunnelrat_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::Other, "io error");
        let err: TunnelratError = io_err.into();
        assert!(matches!(err, TunnelratError::Io(_)));
    }

    #[test]
    fn test_tunnelrat_error_from_protocol() {
        let err: TunnelratError = ProtocolError::BadMagic.into();
        assert!(matches!(err, TunnelratError::Protocol(_)));
    }
}
