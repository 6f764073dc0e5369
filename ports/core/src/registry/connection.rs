//! Guarded connection registry
//!
//! Protocol ports keep their connections in a list behind a reader/writer
//! lock. Each added connection gets a watcher task that fans its traffic
//! into the port-wide streams and removes it when its liveness signal drops.
//!
//! Multicast send copies the list under the read lock and sends outside of
//! it, so no lock is ever held across an await.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::channel::{same_channel, Connection};
use crate::codec::MessageRef;
use crate::error::PortError;

/// Shared connection handle
pub type ConnectionRef = Arc<dyn Connection>;

/// Buffered events and messages per subscriber
const FANOUT_CAPACITY: usize = 1024;

/// Membership change of a [`ConnectionRegistry`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "connection", rename_all = "snake_case")]
pub enum RegistryEvent {
    /// Connection joined
    Added(String),
    /// Connection left
    Removed(String),
}

#[derive(Default)]
struct Members {
    items: Vec<ConnectionRef>,
    frozen: bool,
}

struct Inner {
    port: String,
    handle: Handle,
    members: RwLock<Members>,
    events: broadcast::Sender<RegistryEvent>,
    rx: broadcast::Sender<MessageRef>,
    tx: broadcast::Sender<MessageRef>,
}

/// Lock-guarded, observable list of protocol connections
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<Inner>,
}

impl ConnectionRegistry {
    /// Empty registry for the port `port`
    pub fn new(port: impl Into<String>, handle: Handle) -> Self {
        let (events, _) = broadcast::channel(FANOUT_CAPACITY);
        let (rx, _) = broadcast::channel(FANOUT_CAPACITY);
        let (tx, _) = broadcast::channel(FANOUT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                port: port.into(),
                handle,
                members: RwLock::new(Members::default()),
                events,
                rx,
                tx,
            }),
        }
    }

    /// Add `connection` and start watching it
    ///
    /// Returns `false` and disposes the connection when the registry is
    /// frozen.
    pub fn add(&self, connection: ConnectionRef) -> bool {
        // Subscribe before publishing so no message or close is missed
        let mut rx = connection.on_rx();
        let mut tx = connection.on_tx();
        let mut alive = connection.on_connected();

        {
            let mut members = self.inner.members.write();
            if members.frozen {
                drop(members);
                tracing::debug!(
                    port = %self.inner.port,
                    connection = %connection.id(),
                    "Registry frozen, rejecting connection"
                );
                connection.dispose();
                return false;
            }
            members.items.push(Arc::clone(&connection));
        }

        tracing::info!(port = %self.inner.port, connection = %connection.id(), "Connection added");
        let _ = self
            .inner
            .events
            .send(RegistryEvent::Added(connection.id().to_string()));

        let registry: Weak<Inner> = Arc::downgrade(&self.inner);
        let port_rx = self.inner.rx.clone();
        let port_tx = self.inner.tx.clone();
        self.inner.handle.spawn(async move {
            loop {
                tokio::select! {
                    message = rx.recv() => match message {
                        Ok(message) => { let _ = port_rx.send(message); }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::debug!(connection = %connection.id(), skipped, "Inbound fan-in lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    message = tx.recv() => match message {
                        Ok(message) => { let _ = port_tx.send(message); }
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    // A dropped sender counts as closed too
                    _ = alive.wait_for(|alive| !alive) => break,
                }
            }

            // Deliver what was decoded before the close
            while let Ok(message) = rx.try_recv() {
                let _ = port_rx.send(message);
            }

            if let Some(inner) = registry.upgrade() {
                ConnectionRegistry { inner }.remove(&connection);
            }
        });

        true
    }

    /// Detach and dispose `connection`
    ///
    /// Returns whether it was present. Disposal failures are logged.
    pub fn remove(&self, connection: &ConnectionRef) -> bool {
        let removed = {
            let mut members = self.inner.members.write();
            let index = members.items.iter().position(|c| same_channel(c, connection));
            index.map(|i| members.items.remove(i))
        };

        let Some(removed) = removed else {
            return false;
        };

        removed.dispose();
        tracing::info!(port = %self.inner.port, connection = %removed.id(), "Connection removed");
        let _ = self
            .inner
            .events
            .send(RegistryEvent::Removed(removed.id().to_string()));
        true
    }

    /// Send `message` on every live connection, one after another
    ///
    /// # Errors
    ///
    /// Stops at the first failing connection and returns
    /// `PortError::Send` naming it.
    pub async fn send(
        &self,
        message: &MessageRef,
        cancel: &CancellationToken,
    ) -> Result<usize, PortError> {
        let snapshot = self.snapshot();
        for connection in &snapshot {
            connection
                .send(Arc::clone(message), cancel)
                .await
                .map_err(|source| PortError::Send {
                    port: self.inner.port.clone(),
                    connection: connection.id().to_string(),
                    source,
                })?;
        }
        Ok(snapshot.len())
    }

    /// Dispose and drop every connection, leaving the registry open
    pub fn clear(&self) -> usize {
        let drained = std::mem::take(&mut self.inner.members.write().items);
        let count = drained.len();
        for connection in drained {
            connection.dispose();
            let _ = self
                .inner
                .events
                .send(RegistryEvent::Removed(connection.id().to_string()));
        }
        count
    }

    /// Freeze and dispose every connection; only the first call acts
    pub fn dispose(&self) {
        for connection in self.freeze() {
            connection.dispose();
        }
    }

    /// Freeze and dispose every connection asynchronously
    pub async fn dispose_async(&self) {
        for connection in self.freeze() {
            if let Err(e) = connection.dispose_async().await {
                tracing::warn!(
                    port = %self.inner.port,
                    connection = %connection.id(),
                    error = %e,
                    "Connection shutdown failed"
                );
            }
        }
    }

    fn freeze(&self) -> Vec<ConnectionRef> {
        let mut members = self.inner.members.write();
        if members.frozen {
            return Vec::new();
        }
        members.frozen = true;
        tracing::debug!(
            port = %self.inner.port,
            count = members.items.len(),
            "Connection registry frozen"
        );
        std::mem::take(&mut members.items)
    }

    /// Consistent copy of the current connections
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConnectionRef> {
        self.inner.members.read().items.clone()
    }

    /// Number of connections
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.members.read().items.len()
    }

    /// Whether there are no connections
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the registry was disposed
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.inner.members.read().frozen
    }

    /// Membership changes
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<RegistryEvent> {
        self.inner.events.subscribe()
    }

    /// Inbound messages from every connection
    #[must_use]
    pub fn on_rx(&self) -> broadcast::Receiver<MessageRef> {
        self.inner.rx.subscribe()
    }

    /// Outbound messages sent on any connection
    #[must_use]
    pub fn on_tx(&self) -> broadcast::Receiver<MessageRef> {
        self.inner.tx.subscribe()
    }
}
