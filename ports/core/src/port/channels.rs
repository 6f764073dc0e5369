use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::channel::RawLink;
use crate::stats::PortStatistics;

/// The registry flavor a port keeps its live channels in
#[async_trait]
pub trait Channels: Send + Sync + 'static {
    /// Wrap `link`, start it under `session` and register it
    ///
    /// Returns its liveness signal, or `None` if the registry rejected it.
    fn attach(&self, link: RawLink, session: &CancellationToken) -> Option<watch::Receiver<bool>>;

    /// Dispose every channel without freezing the registry
    fn clear(&self);

    /// Reclaim channels that closed on their own
    fn sweep(&self) -> usize {
        0
    }

    /// Whether the port should run [`Channels::sweep`] periodically
    fn periodic_sweep(&self) -> bool {
        false
    }

    /// Number of live channels
    fn len(&self) -> usize;

    /// Whether there are no live channels
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-port traffic counters
    fn statistics(&self) -> &Arc<PortStatistics>;

    /// Freeze and dispose every channel
    fn dispose(&self);

    /// Freeze and dispose every channel, preferring async shutdown
    async fn dispose_async(&self);
}
