//! Traffic Statistics
//!
//! Lock-free counters kept per port and rolled up into the shared
//! [`crate::ProtocolCore`] aggregate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Point-in-time copy of [`PortStatistics`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    /// Bytes received
    pub rx_bytes: u64,
    /// Bytes sent
    pub tx_bytes: u64,
    /// Messages decoded and delivered
    pub rx_messages: u64,
    /// Messages sent
    pub tx_messages: u64,
    /// Decode failures
    pub parser_errors: u64,
    /// Messages dropped by a route filter
    pub dropped: u64,
}

/// Atomic traffic counters
///
/// Every increment is forwarded to the parent, if any.
#[derive(Debug, Default)]
pub struct PortStatistics {
    rx_bytes: AtomicU64,
    tx_bytes: AtomicU64,
    rx_messages: AtomicU64,
    tx_messages: AtomicU64,
    parser_errors: AtomicU64,
    dropped: AtomicU64,
    parent: Option<Arc<PortStatistics>>,
}

macro_rules! counter {
    ($name:ident, $field:ident) => {
        #[doc = concat!("Add to `", stringify!($field), "`")]
        pub fn $name(&self, n: u64) {
            self.$field.fetch_add(n, Ordering::Relaxed);
            if let Some(parent) = &self.parent {
                parent.$name(n);
            }
        }
    };
}

impl PortStatistics {
    /// Root counters with no parent
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters that also feed `parent`
    #[must_use]
    pub fn with_parent(parent: Arc<PortStatistics>) -> Self {
        Self {
            parent: Some(parent),
            ..Self::default()
        }
    }

    counter!(add_rx_bytes, rx_bytes);
    counter!(add_tx_bytes, tx_bytes);
    counter!(add_rx_messages, rx_messages);
    counter!(add_tx_messages, tx_messages);
    counter!(add_parser_errors, parser_errors);
    counter!(add_dropped, dropped);

    /// Read every counter
    #[must_use]
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            rx_messages: self.rx_messages.load(Ordering::Relaxed),
            tx_messages: self.tx_messages.load(Ordering::Relaxed),
            parser_errors: self.parser_errors.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_rolls_up_into_parent() {
        let total = Arc::new(PortStatistics::new());
        let a = PortStatistics::with_parent(Arc::clone(&total));
        let b = PortStatistics::with_parent(Arc::clone(&total));

        a.add_rx_bytes(10);
        b.add_rx_bytes(5);
        b.add_dropped(1);
        a.add_tx_messages(2);

        assert_eq!(a.snapshot().rx_bytes, 10);
        assert_eq!(b.snapshot().rx_bytes, 5);
        assert_eq!(
            total.snapshot(),
            StatisticsSnapshot {
                rx_bytes: 15,
                tx_messages: 2,
                dropped: 1,
                ..StatisticsSnapshot::default()
            }
        );
    }
}
