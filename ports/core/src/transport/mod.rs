//! Transport Adapters
//!
//! Adapters own the OS resource of a port and nothing else:
//! - `TcpClient`: one outbound connection per enable
//! - `TcpServer`: a listener plus an accept loop, any number of peers
//! - `Serial`: one serial device
//!
//! `open` hands every link it produces to the [`Session`]; the port decides
//! what to wrap it in. Links die with the session token, so `close` only has
//! to release what the adapter itself holds (a listener, an accept task).

pub mod serial;
pub mod tcp_client;
pub mod tcp_server;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{PortConfig, TransportKind};
use crate::error::TransportError;
use crate::port::Session;

pub use serial::SerialAdapter;
pub use tcp_client::TcpClientAdapter;
pub use tcp_server::TcpServerAdapter;

/// Connect/accept/open primitives of one transport
#[async_trait]
pub trait TransportAdapter: Send + Sync + 'static {
    /// Acquire the OS resource and attach the resulting links
    ///
    /// # Errors
    ///
    /// Any failure to connect, bind or open. The port turns it into an
    /// Error status and schedules a retry.
    async fn open(&self, session: Session) -> Result<(), TransportError>;

    /// Release the OS resource; idempotent
    ///
    /// # Errors
    ///
    /// Failures while releasing; the resource is considered gone anyway.
    async fn close(&self) -> Result<(), TransportError>;

    /// Local socket address, when there is one
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// Adapter for the transport `config` describes
#[must_use]
pub fn adapter_for(config: &PortConfig) -> Arc<dyn TransportAdapter> {
    let id = config.id();
    match &config.transport {
        TransportKind::TcpClient { host, port } => Arc::new(TcpClientAdapter::new(
            id,
            host.clone(),
            *port,
            config.connect_timeout,
        )),
        TransportKind::TcpServer {
            host,
            port,
            max_connections,
        } => Arc::new(TcpServerAdapter::new(
            id,
            host.clone(),
            *port,
            *max_connections,
        )),
        TransportKind::Serial(settings) => Arc::new(SerialAdapter::new(id, settings.clone())),
    }
}
