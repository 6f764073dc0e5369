//! Port Configuration
//!
//! A [`PortConfig`] is derived from a connection string, validated once at
//! construction, and immutable afterwards. Invalid configuration fails fast
//! and is never retried.
//!
//! # Common parameters
//!
//! | Key | Meaning | Default |
//! |---|---|---|
//! | `reconnect` | delay before retrying after an error (ms) | 5000 |
//! | `connect_timeout` | outbound connect bound (ms) | 5000 |
//! | `sweep` | stale endpoint sweep period for pipe ports (ms) | 10000 |
//!
//! # Transport parameters
//!
//! - `tcp_s`: `max_connections` (0 = unlimited)
//! - `serial`: `br` (baud), `parity` (`none`/`odd`/`even`), `stop_bits` (1/2),
//!   `data_bits` (5-8), `wrt` (write timeout ms), `wrb` (write buffer bytes)

pub mod file;
pub mod uri;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PortError;

pub use file::{
    default_config_path, load_config, load_config_from_path, ConfigError, PortEntry, PortsToml,
};
pub use uri::ConnectionString;

/// Default reconnect delay after an error
pub const DEFAULT_RECONNECT_MS: u64 = 5_000;

/// Default outbound connect timeout
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Default stale endpoint sweep period
pub const DEFAULT_SWEEP_MS: u64 = 10_000;

/// Default serial write buffer size
pub const DEFAULT_WRITE_BUFFER: usize = 4_096;

/// Fallback values for parameters a connection string leaves out
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortDefaults {
    /// Reconnect delay in milliseconds
    pub reconnect_ms: u64,
    /// Connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Sweep period in milliseconds
    pub sweep_ms: u64,
}

impl Default for PortDefaults {
    fn default() -> Self {
        Self {
            reconnect_ms: DEFAULT_RECONNECT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            sweep_ms: DEFAULT_SWEEP_MS,
        }
    }
}

/// Serial parity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// No parity bit
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Odd => write!(f, "odd"),
            Self::Even => write!(f, "even"),
        }
    }
}

/// Serial line settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Device name or path
    pub device: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Parity
    pub parity: Parity,
    /// Stop bits (1 or 2)
    pub stop_bits: u8,
    /// Data bits (5 to 8)
    pub data_bits: u8,
    /// Write timeout
    pub write_timeout: Duration,
    /// Write buffer size in bytes
    pub write_buffer_size: usize,
}

/// Which transport a port drives, with its parameters
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportKind {
    /// One outbound TCP connection per enable
    TcpClient {
        /// Remote host
        host: String,
        /// Remote port
        port: u16,
    },
    /// Listening TCP socket accepting any number of peers
    TcpServer {
        /// Bind host
        host: String,
        /// Bind port (0 = ephemeral)
        port: u16,
        /// Maximum simultaneous peers (0 = unlimited)
        max_connections: usize,
    },
    /// Serial device
    Serial(SerialSettings),
}

impl TransportKind {
    /// Connection string scheme for this transport
    #[must_use]
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::TcpClient { .. } => "tcp_c",
            Self::TcpServer { .. } => "tcp_s",
            Self::Serial(_) => "serial",
        }
    }
}

/// Validated, immutable configuration of one port
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortConfig {
    /// Transport and its parameters
    pub transport: TransportKind,
    /// Delay before a retry after an error
    pub reconnect_timeout: Duration,
    /// Bound on outbound connect
    pub connect_timeout: Duration,
    /// Period of the stale endpoint sweep (pipe ports)
    pub sweep_interval: Duration,
}

impl PortConfig {
    /// Parse a connection string using built-in defaults
    ///
    /// # Errors
    ///
    /// Returns `PortError::Config` for malformed or invalid values and
    /// `PortError::UnsupportedScheme` for schemes without an adapter.
    pub fn parse(connection_string: &str) -> Result<Self, PortError> {
        Self::parse_with(connection_string, &PortDefaults::default())
    }

    /// Parse a connection string, filling missing values from `defaults`
    ///
    /// # Errors
    ///
    /// See [`PortConfig::parse`].
    pub fn parse_with(connection_string: &str, defaults: &PortDefaults) -> Result<Self, PortError> {
        let mut cs = ConnectionString::parse(connection_string)?;

        let reconnect_ms = cs.take_number("reconnect")?.unwrap_or(defaults.reconnect_ms);
        let connect_ms = cs
            .take_number("connect_timeout")?
            .unwrap_or(defaults.connect_timeout_ms);
        let sweep_ms = cs.take_number("sweep")?.unwrap_or(defaults.sweep_ms);

        let transport = match cs.scheme.as_str() {
            "tcp_c" => {
                let (host, port) = split_host_port(&cs.target)?;
                if port == 0 {
                    return Err(PortError::Config(format!(
                        "tcp_c needs a non-zero port, got `{}`",
                        cs.target
                    )));
                }
                TransportKind::TcpClient { host, port }
            }
            "tcp_s" => {
                let (host, port) = split_host_port(&cs.target)?;
                let max_connections = cs.take_number("max_connections")?.unwrap_or(0);
                TransportKind::TcpServer {
                    host,
                    port,
                    max_connections,
                }
            }
            "serial" => TransportKind::Serial(parse_serial(&mut cs)?),
            other => return Err(PortError::UnsupportedScheme(other.to_string())),
        };

        cs.ensure_consumed()?;

        let config = Self {
            transport,
            reconnect_timeout: Duration::from_millis(reconnect_ms),
            connect_timeout: Duration::from_millis(connect_ms),
            sweep_interval: Duration::from_millis(sweep_ms),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check timeouts and transport parameters
    ///
    /// # Errors
    ///
    /// Returns `PortError::Config` naming the first invalid value.
    pub fn validate(&self) -> Result<(), PortError> {
        if self.reconnect_timeout.is_zero() {
            return Err(PortError::Config("reconnect timeout must be positive".into()));
        }
        if self.connect_timeout.is_zero() {
            return Err(PortError::Config("connect timeout must be positive".into()));
        }
        if self.sweep_interval.is_zero() {
            return Err(PortError::Config("sweep interval must be positive".into()));
        }
        if let TransportKind::Serial(serial) = &self.transport {
            if serial.baud_rate == 0 {
                return Err(PortError::Config("baud rate must be positive".into()));
            }
            if !(5..=8).contains(&serial.data_bits) {
                return Err(PortError::Config(format!(
                    "data bits must be 5..=8, got {}",
                    serial.data_bits
                )));
            }
            if !(1..=2).contains(&serial.stop_bits) {
                return Err(PortError::Config(format!(
                    "stop bits must be 1 or 2, got {}",
                    serial.stop_bits
                )));
            }
            if serial.write_timeout.is_zero() || serial.write_buffer_size == 0 {
                return Err(PortError::Config(
                    "serial write timeout and buffer size must be positive".into(),
                ));
            }
        }
        Ok(())
    }

    /// Port id derived from the transport parameters
    ///
    /// Stable across restarts so it can be used for log correlation and
    /// de-duplication.
    #[must_use]
    pub fn id(&self) -> String {
        match &self.transport {
            TransportKind::TcpClient { host, port } => format!("tcp_c://{host}:{port}"),
            TransportKind::TcpServer { host, port, .. } => format!("tcp_s://{host}:{port}"),
            TransportKind::Serial(s) => format!(
                "serial:{}?br={}&parity={}&stop_bits={}&data_bits={}",
                s.device, s.baud_rate, s.parity, s.stop_bits, s.data_bits
            ),
        }
    }
}

fn split_host_port(target: &str) -> Result<(String, u16), PortError> {
    let (host, port) = target
        .rsplit_once(':')
        .ok_or_else(|| PortError::Config(format!("expected host:port, got `{target}`")))?;
    if host.is_empty() {
        return Err(PortError::Config(format!("missing host in `{target}`")));
    }
    let port = port
        .parse()
        .map_err(|_| PortError::Config(format!("invalid port in `{target}`")))?;
    Ok((host.to_string(), port))
}

fn parse_serial(cs: &mut ConnectionString) -> Result<SerialSettings, PortError> {
    let parity = cs.take("parity").map(|p| p.to_ascii_lowercase());
    let parity = match parity.as_deref() {
        None | Some("none" | "n") => Parity::None,
        Some("odd" | "o") => Parity::Odd,
        Some("even" | "e") => Parity::Even,
        Some(other) => return Err(PortError::Config(format!("unknown parity `{other}`"))),
    };

    Ok(SerialSettings {
        device: cs.target.clone(),
        baud_rate: cs.take_number("br")?.unwrap_or(115_200),
        parity,
        stop_bits: cs.take_number("stop_bits")?.unwrap_or(1),
        data_bits: cs.take_number("data_bits")?.unwrap_or(8),
        write_timeout: Duration::from_millis(cs.take_number("wrt")?.unwrap_or(200)),
        write_buffer_size: cs.take_number("wrb")?.unwrap_or(DEFAULT_WRITE_BUFFER),
    })
}
