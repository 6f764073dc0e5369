//! Protocol ports: decoded connections in a guarded registry

use std::sync::Arc;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use super::{Channels, Port};
use crate::channel::{Connection, RawLink, StreamConnection};
use crate::codec::{MessageRef, ParserFactory, RouteFilter};
use crate::error::PortError;
use crate::registry::{ConnectionRef, ConnectionRegistry, RegistryEvent};
use crate::stats::PortStatistics;

/// Channels of a [`super::ProtocolPort`]
pub struct ProtocolChannels {
    registry: ConnectionRegistry,
    handle: Handle,
    stats: Arc<PortStatistics>,
    filters: Arc<[Arc<dyn RouteFilter>]>,
    parsers: Arc<dyn ParserFactory>,
}

impl ProtocolChannels {
    /// Empty set for the port `port`
    pub fn new(
        port: &str,
        handle: Handle,
        stats: Arc<PortStatistics>,
        filters: Vec<Arc<dyn RouteFilter>>,
        parsers: Arc<dyn ParserFactory>,
    ) -> Self {
        Self {
            registry: ConnectionRegistry::new(port, handle.clone()),
            handle,
            stats,
            filters: filters.into(),
            parsers,
        }
    }
}

#[async_trait]
impl Channels for ProtocolChannels {
    fn attach(&self, link: RawLink, session: &CancellationToken) -> Option<watch::Receiver<bool>> {
        let connection = StreamConnection::start(
            link,
            &self.handle,
            session,
            Arc::clone(&self.stats),
            Arc::clone(&self.filters),
            self.parsers.as_ref(),
        );
        let alive = connection.on_connected();
        self.registry.add(connection).then_some(alive)
    }

    fn clear(&self) {
        self.registry.clear();
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

impl Port<ProtocolChannels> {
    /// Multicast `message` to every live connection
    ///
    /// Returns the number of connections it was sent on.
    ///
    /// # Errors
    ///
    /// `PortError::Disposed` on a disposed port; otherwise the first
    /// connection failure as `PortError::Send`, which stops the multicast.
    pub async fn send(
        &self,
        message: MessageRef,
        cancel: &CancellationToken,
    ) -> Result<usize, PortError> {
        if self.is_disposed() {
            return Err(PortError::Disposed(self.inner.id.clone()));
        }
        self.inner.channels.registry.send(&message, cancel).await
    }

    /// Decoded inbound messages from every connection
    #[must_use]
    pub fn on_rx(&self) -> broadcast::Receiver<MessageRef> {
        self.inner.channels.registry.on_rx()
    }

    /// Messages sent on any connection
    #[must_use]
    pub fn on_tx(&self) -> broadcast::Receiver<MessageRef> {
        self.inner.channels.registry.on_tx()
    }

    /// Current connections
    #[must_use]
    pub fn connections(&self) -> Vec<ConnectionRef> {
        self.inner.channels.registry.snapshot()
    }

    /// Connection joined/left events
    #[must_use]
    pub fn on_registry_event(&self) -> broadcast::Receiver<RegistryEvent> {
        self.inner.channels.registry.events()
    }
}
