//! Raw byte endpoints for pipe ports

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use super::{LinkIo, RawLink};
use crate::error::TransportError;
use crate::stats::PortStatistics;

/// Inbound chunks buffered per subscriber
const INBOUND_CAPACITY: usize = 256;

/// A live duplex byte channel owned by a pipe port
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Link id
    fn id(&self) -> &str;

    /// True once the endpoint was disposed or its stream closed
    fn is_disposed(&self) -> bool;

    /// Inbound byte chunks, without replay
    fn subscribe(&self) -> broadcast::Receiver<Bytes>;

    /// Write and flush
    async fn write(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Close the stream; idempotent
    fn dispose(&self);

    /// Close the stream, flushing the write side first
    async fn dispose_async(&self) {
        self.dispose();
    }
}

/// [`Endpoint`] over a [`RawLink`]
pub struct StreamEndpoint {
    io: Arc<LinkIo>,
    inbound: broadcast::Sender<Bytes>,
}

impl StreamEndpoint {
    /// Start reading `link`
    pub fn start(
        link: RawLink,
        handle: &Handle,
        session: &CancellationToken,
        stats: Arc<PortStatistics>,
    ) -> Arc<Self> {
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);
        let tx = inbound.clone();
        let io = LinkIo::start(link, handle, session, stats, move |data| {
            // Nobody listening is fine
            let _ = tx.send(Bytes::copy_from_slice(data));
        });
        Arc::new(Self { io, inbound })
    }

    /// Liveness: `true` while the stream is open
    #[must_use]
    pub fn liveness(&self) -> watch::Receiver<bool> {
        self.io.liveness()
    }
}

#[async_trait]
impl Endpoint for StreamEndpoint {
    fn id(&self) -> &str {
        self.io.id()
    }

    fn is_disposed(&self) -> bool {
        !self.io.is_alive()
    }

    fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.inbound.subscribe()
    }

    async fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        self.io.write(data).await
    }

    fn dispose(&self) {
        self.io.dispose();
    }

    async fn dispose_async(&self) {
        if let Err(e) = self.io.dispose_async().await {
            tracing::warn!(endpoint = %self.io.id(), error = %e, "Endpoint shutdown failed");
        }
    }
}
