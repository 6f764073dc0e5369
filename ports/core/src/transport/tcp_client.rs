//! TCP client adapter

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::TcpStream;

use super::TransportAdapter;
use crate::channel::RawLink;
use crate::error::TransportError;
use crate::port::Session;

/// Connects to `host:port` once per enable
pub struct TcpClientAdapter {
    id: String,
    host: String,
    port: u16,
    connect_timeout: Duration,
    local: Mutex<Option<SocketAddr>>,
}

impl TcpClientAdapter {
    /// Adapter for the port `id`
    pub fn new(id: String, host: String, port: u16, connect_timeout: Duration) -> Self {
        Self {
            id,
            host,
            port,
            connect_timeout,
            local: Mutex::new(None),
        }
    }
}

#[async_trait]
impl TransportAdapter for TcpClientAdapter {
    async fn open(&self, session: Session) -> Result<(), TransportError> {
        let addr = format!("{}:{}", self.host, self.port);
        tracing::debug!(port = %self.id, %addr, "Connecting");

        let connect = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr));
        let stream = tokio::select! {
            biased;
            () = session.token().cancelled() => return Err(TransportError::Cancelled),
            result = connect => match result {
                Ok(stream) => stream?,
                Err(_) => {
                    return Err(TransportError::ConnectTimeout {
                        addr: addr.clone(),
                        timeout: self.connect_timeout,
                    })
                }
            },
        };

        stream.set_nodelay(true)?;
        *self.local.lock() = stream.local_addr().ok();

        if !session.attach(RawLink::new(self.id.clone(), stream).critical()) {
            return Err(TransportError::Cancelled);
        }
        tracing::debug!(port = %self.id, %addr, "Connected");
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        // The link itself closes with its session
        self.local.lock().take();
        Ok(())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        *self.local.lock()
    }
}
