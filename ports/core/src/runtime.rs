//! Shared context handed to every port

use std::sync::Arc;

use tokio::runtime::Handle;

use crate::stats::{PortStatistics, StatisticsSnapshot};

/// Runtime handle and aggregate counters shared by a family of ports
///
/// Lifecycle work (`enable`, `disable`), timers and accept loops are spawned
/// onto `handle`. Every port's counters roll up into the shared statistics.
#[derive(Clone, Debug)]
pub struct ProtocolCore {
    handle: Handle,
    stats: Arc<PortStatistics>,
}

impl ProtocolCore {
    /// Core running on `handle`
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            stats: Arc::new(PortStatistics::new()),
        }
    }

    /// Core on the runtime of the calling task
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    #[must_use]
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Runtime handle
    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Fresh per-port counters rolling up into this core
    #[must_use]
    pub fn port_statistics(&self) -> Arc<PortStatistics> {
        Arc::new(PortStatistics::with_parent(Arc::clone(&self.stats)))
    }

    /// Totals across every port of this core
    #[must_use]
    pub fn statistics(&self) -> StatisticsSnapshot {
        self.stats.snapshot()
    }
}
