//! Error Types
//!
//! Two layers of errors:
//! - [`TransportError`]: what went wrong on the wire (connect, accept, open,
//!   read, write, framing)
//! - [`PortError`]: what the user of a port sees; transport failures are
//!   wrapped with the id of the port they happened on
//!
//! Transport errors never escape `enable`/`disable`. They are converted into
//! an Error-property event by the port state machine instead.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors produced by the byte-level codec seam
#[derive(Debug, Error)]
pub enum CodecError {
    /// Frame header announced a payload larger than allowed
    #[error("frame size {len} exceeds maximum {max}")]
    FrameTooLarge {
        /// Announced payload length
        len: usize,
        /// Maximum accepted payload length
        max: usize,
    },

    /// Frame checksum mismatch - data corruption detected
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Expected checksum value
        expected: u32,
        /// Actual checksum value computed over the payload
        actual: u32,
    },

    /// Payload could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Errors raised by transport adapters and live channels
#[derive(Debug, Error)]
pub enum TransportError {
    /// IO error from the underlying socket or device
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Outbound connect did not complete in time
    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout {
        /// Remote address
        addr: String,
        /// Configured timeout
        timeout: Duration,
    },

    /// Serial device could not be opened or configured
    #[error("serial error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// Peer closed the channel or the channel was disposed
    #[error("connection closed")]
    ConnectionClosed,

    /// Codec failure while framing an outbound message
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Operation was cancelled through its cancellation token
    #[error("operation cancelled")]
    Cancelled,
}

/// Errors visible to users of a port
#[derive(Debug, Error)]
pub enum PortError {
    /// Invalid configuration; never retried
    #[error("invalid port config: {0}")]
    Config(String),

    /// Connection string names a scheme without an adapter
    #[error("unsupported port scheme `{0}`")]
    UnsupportedScheme(String),

    /// Runtime transport failure on a specific port
    #[error("port {port}: {source}")]
    Transport {
        /// Id of the port the failure happened on
        port: String,
        /// Underlying transport failure
        #[source]
        source: TransportError,
    },

    /// Operation attempted on a disposed port
    #[error("port {0} is disposed")]
    Disposed(String),

    /// Waiting for a status transition timed out
    #[error("timed out after {timeout:?} waiting for port {port}")]
    Timeout {
        /// Port id
        port: String,
        /// Elapsed wait
        timeout: Duration,
    },

    /// Waiting was cancelled by the caller
    #[error("wait on port {0} cancelled")]
    Cancelled(String),

    /// Multicast send failed on one of the live connections
    #[error("send on port {port} failed via {connection}: {source}")]
    Send {
        /// Port id
        port: String,
        /// Connection the send failed on
        connection: String,
        /// Underlying failure
        #[source]
        source: TransportError,
    },
}

impl PortError {
    /// Wrap a transport failure into a port-scoped error
    #[must_use]
    pub fn transport(port: impl Into<String>, source: TransportError) -> Self {
        Self::Transport {
            port: port.into(),
            source,
        }
    }

    /// Whether this error should never be retried
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::UnsupportedScheme(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_is_port_scoped() {
        let err = PortError::transport(
            "tcp_c://127.0.0.1:7341",
            TransportError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")),
        );
        let text = err.to_string();
        assert!(text.starts_with("port tcp_c://127.0.0.1:7341"));
        assert!(text.contains("refused"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_config_errors_are_flagged() {
        assert!(PortError::Config("bad".into()).is_config());
        assert!(PortError::UnsupportedScheme("udp".into()).is_config());
        assert!(!PortError::Disposed("p".into()).is_config());
    }

    #[test]
    fn test_checksum_display() {
        let err = CodecError::ChecksumMismatch {
            expected: 0xDEAD_BEEF,
            actual: 1,
        };
        assert_eq!(
            err.to_string(),
            "checksum mismatch: expected 0xdeadbeef, got 0x00000001"
        );
    }
}
