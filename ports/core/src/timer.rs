//! Owned Timers
//!
//! Reconnect retries and stale endpoint sweeps run on timers owned by exactly
//! one port. An [`OwnedTimer`] stops firing once it is cancelled or dropped.
//! A callback that is already running is never aborted; it is expected to
//! re-check the owner's state before acting.

use std::future::Future;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Cancellable one-shot or periodic timer
#[derive(Debug)]
pub struct OwnedTimer {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl OwnedTimer {
    /// Run `f` once after `delay`
    pub fn once<F, Fut>(handle: &Handle, delay: Duration, f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = handle.spawn(async move {
            tokio::select! {
                () = token.cancelled() => return,
                () = time::sleep(delay) => {}
            }
            f().await;
        });
        Self { cancel, task }
    }

    /// Run `f` every `period`, first tick one period from now
    ///
    /// Ticks never overlap: the next one is scheduled after the callback
    /// returns.
    pub fn periodic<F, Fut>(handle: &Handle, period: Duration, mut f: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = handle.spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                f().await;
            }
        });
        Self { cancel, task }
    }

    /// Stop future firings
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the timer was cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the timer task has completed
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for OwnedTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_once_fires_after_delay() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let timer = OwnedTimer::once(&Handle::current(), Duration::from_millis(100), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(timer.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let timer = OwnedTimer::once(&Handle::current(), Duration::from_millis(100), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(timer);

        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_until_cancelled() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let timer = OwnedTimer::periodic(&Handle::current(), Duration::from_millis(10), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        time::sleep(Duration::from_millis(35)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        timer.cancel();
        assert!(timer.is_cancelled());
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_does_not_abort_running_callback() {
        let done = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&done);
        let timer = OwnedTimer::once(&Handle::current(), Duration::from_millis(1), move || async move {
            time::sleep(Duration::from_millis(50)).await;
            flag.fetch_add(1, Ordering::SeqCst);
        });

        time::sleep(Duration::from_millis(10)).await;
        drop(timer);
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
