//! Pipe ports: raw byte endpoints in a lock-free registry

use std::sync::Arc;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::{Channels, Port};
use crate::channel::{RawLink, StreamEndpoint};
use crate::error::PortError;
use crate::registry::{EndpointRef, EndpointRegistry};
use crate::stats::PortStatistics;

/// Channels of a [`super::PipePort`]
pub struct PipeChannels {
    registry: EndpointRegistry,
    handle: Handle,
    stats: Arc<PortStatistics>,
}

impl PipeChannels {
    /// Empty set for the port `port`
    pub fn new(port: &str, handle: Handle, stats: Arc<PortStatistics>) -> Self {
        Self {
            registry: EndpointRegistry::new(port),
            handle,
            stats,
        }
    }
}

#[async_trait]
impl Channels for PipeChannels {
    fn attach(&self, link: RawLink, session: &CancellationToken) -> Option<watch::Receiver<bool>> {
        let endpoint = StreamEndpoint::start(link, &self.handle, session, Arc::clone(&self.stats));
        let alive = endpoint.liveness();
        self.registry.add(endpoint).then_some(alive)
    }

    fn clear(&self) {
        self.registry.clear();
    }

    fn sweep(&self) -> usize {
        self.registry.sweep()
    }

    fn periodic_sweep(&self) -> bool {
        true
    }

    fn len(&self) -> usize {
        self.registry.len()
    }

    fn statistics(&self) -> &Arc<PortStatistics> {
        &self.stats
    }

    fn dispose(&self) {
        self.registry.dispose();
    }

    async fn dispose_async(&self) {
        self.registry.dispose_async().await;
    }
}

impl Port<PipeChannels> {
    /// Current endpoints
    #[must_use]
    pub fn endpoints(&self) -> Arc<[EndpointRef]> {
        self.inner.channels.registry.snapshot()
    }

    /// Write `data` to every live endpoint
    ///
    /// Endpoints that fail are logged and skipped; the sweep reclaims them.
    /// Returns the number of endpoints written.
    ///
    /// # Errors
    ///
    /// Returns `PortError::Disposed` on a disposed port.
    pub async fn write(&self, data: &[u8]) -> Result<usize, PortError> {
        if self.is_disposed() {
            return Err(PortError::Disposed(self.inner.id.clone()));
        }
        let mut written = 0;
        for endpoint in self.endpoints().iter() {
            match endpoint.write(data).await {
                Ok(()) => written += 1,
                Err(e) => tracing::debug!(
                    port = %self.inner.id,
                    endpoint = %endpoint.id(),
                    error = %e,
                    "Endpoint write failed"
                ),
            }
        }
        Ok(written)
    }

    /// Reclaim closed endpoints now instead of waiting for the timer
    pub fn sweep(&self) -> usize {
        self.inner.channels.sweep()
    }
}
