//! Observable Properties
//!
//! [`Property`] is a hot value with replay-latest semantics: a new subscriber
//! first sees the current value, then every later change in the order it was
//! produced. Port Status, Error and IsEnabled are properties.
//!
//! Message streams are a different primitive (fan-out without replay) and use
//! `tokio::sync::broadcast` directly.
//!
//! # Ordering
//!
//! `set` publishes while holding the write lock, so concurrent writers are
//! observed by every subscriber in the same order they took effect.

use parking_lot::RwLock;
use tokio::sync::broadcast;

/// Buffered changes per subscriber before it starts lagging
const CHANGE_CAPACITY: usize = 64;

struct PropertyState<T> {
    value: T,
    /// `None` once the property is closed
    tx: Option<broadcast::Sender<T>>,
}

/// Replay-latest observable value
pub struct Property<T: Clone + Send + 'static> {
    state: RwLock<PropertyState<T>>,
}

impl<T: Clone + Send + 'static> Property<T> {
    /// Create a property holding `initial`
    #[must_use]
    pub fn new(initial: T) -> Self {
        let (tx, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            state: RwLock::new(PropertyState {
                value: initial,
                tx: Some(tx),
            }),
        }
    }

    /// Current value
    #[must_use]
    pub fn get(&self) -> T {
        self.state.read().value.clone()
    }

    /// Replace the value and notify subscribers
    ///
    /// After [`Property::close`] the value is still stored but nobody is
    /// notified.
    pub fn set(&self, value: T) {
        let mut state = self.state.write();
        state.value = value.clone();
        if let Some(tx) = &state.tx {
            // No receivers is fine
            let _ = tx.send(value);
        }
    }

    /// Subscribe: yields the current value, then every change
    #[must_use]
    pub fn subscribe(&self) -> PropertyStream<T> {
        let state = self.state.read();
        PropertyStream {
            pending: Some(state.value.clone()),
            rx: state.tx.as_ref().map(broadcast::Sender::subscribe),
        }
    }

    /// Stop notifying; open streams end after draining
    pub fn close(&self) {
        self.state.write().tx = None;
    }

    /// Whether [`Property::close`] has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.read().tx.is_none()
    }
}

impl<T: Clone + Send + std::fmt::Debug + 'static> std::fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Property")
            .field("value", &state.value)
            .field("closed", &state.tx.is_none())
            .finish()
    }
}

/// Subscription to a [`Property`]
pub struct PropertyStream<T: Clone + Send + 'static> {
    pending: Option<T>,
    rx: Option<broadcast::Receiver<T>>,
}

impl<T: Clone + Send + 'static> PropertyStream<T> {
    /// Next value, or `None` once the property is closed and drained
    ///
    /// A subscriber that falls more than the channel capacity behind skips
    /// the oldest changes and continues with the newest ones.
    pub async fn next(&mut self) -> Option<T> {
        if let Some(value) = self.pending.take() {
            return Some(value);
        }
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(value) => return Some(value),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Property subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Wait until a value satisfies `predicate`
    ///
    /// Returns `None` if the property closes first.
    pub async fn wait_for(&mut self, mut predicate: impl FnMut(&T) -> bool) -> Option<T> {
        while let Some(value) = self.next().await {
            if predicate(&value) {
                return Some(value);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_replays_latest_then_changes() {
        let prop = Property::new(1);
        prop.set(2);

        let mut stream = prop.subscribe();
        prop.set(3);
        prop.set(4);

        assert_eq!(stream.next().await, Some(2));
        assert_eq!(stream.next().await, Some(3));
        assert_eq!(stream.next().await, Some(4));
    }

    #[tokio::test]
    async fn test_close_ends_stream() {
        let prop = Property::new("a");
        let mut stream = prop.subscribe();
        prop.set("b");
        prop.close();
        prop.set("c");

        assert_eq!(stream.next().await, Some("a"));
        assert_eq!(stream.next().await, Some("b"));
        assert_eq!(stream.next().await, None);
        assert_eq!(prop.get(), "c");
        assert!(prop.is_closed());
    }

    #[tokio::test]
    async fn test_subscribe_after_close_yields_current_only() {
        let prop = Property::new(7);
        prop.close();
        let mut stream = prop.subscribe();
        assert_eq!(stream.next().await, Some(7));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_wait_for() {
        let prop = Arc::new(Property::new(0));
        let mut stream = prop.subscribe();

        let writer = Arc::clone(&prop);
        tokio::spawn(async move {
            for i in 1..=5 {
                writer.set(i);
            }
        });

        assert_eq!(stream.wait_for(|v| *v == 5).await, Some(5));
    }

    #[tokio::test]
    async fn test_concurrent_writers_are_seen_in_one_order() {
        let prop = Arc::new(Property::new(0u32));
        let mut first = prop.subscribe();
        let mut second = prop.subscribe();

        let mut handles = Vec::new();
        for t in 0..4u32 {
            let prop = Arc::clone(&prop);
            handles.push(tokio::spawn(async move {
                for i in 0..8u32 {
                    prop.set(t * 100 + i + 1);
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        prop.close();

        let mut a = Vec::new();
        while let Some(v) = first.next().await {
            a.push(v);
        }
        let mut b = Vec::new();
        while let Some(v) = second.next().await {
            b.push(v);
        }
        assert_eq!(a.len(), 33);
        assert_eq!(a, b);
    }
}
