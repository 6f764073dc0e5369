//! Port State Machine
//!
//! A [`Port`] gives every transport the same lifecycle:
//!
//! ```text
//!                enable                 open ok
//! Disconnected ─────────▶ InProgress ─────────────▶ Connected
//!       ▲                  │    ▲                      │
//!       │ disable          │    │ reconnect timer      │ link lost
//!       └──────────────────┘    │                      ▼
//!                               └──────────────── Error
//! ```
//!
//! # Concurrency
//!
//! - `enable` and `disable` claim a busy flag first. A call that finds it
//!   taken is dropped, not queued.
//! - Status, Error and IsEnabled are replay-latest [`Property`]s, so every
//!   observer sees transitions in the order they happened.
//! - Each enable session owns a cancellation token. Disable, a newer enable
//!   or disposal cancels it, which closes every link of that session and
//!   invalidates its pending reconnect.
//!
//! # Disposal
//!
//! Teardown order: session token, timers, adapter close, registry (which
//! disposes every live channel), then the properties. Only the first call
//! to `dispose`/`dispose_async` does anything.

mod channels;
mod pipe;
mod protocol;
mod session;

use std::collections::BTreeSet;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::channel::RawLink;
use crate::config::PortConfig;
use crate::dispose::DisposeFlag;
use crate::error::{PortError, TransportError};
use crate::property::{Property, PropertyStream};
use crate::runtime::ProtocolCore;
use crate::stats::StatisticsSnapshot;
use crate::timer::OwnedTimer;
use crate::transport::TransportAdapter;

pub use channels::Channels;
pub use pipe::PipeChannels;
pub use protocol::ProtocolChannels;
pub use session::Session;
use session::PortSink;

#[cfg(test)]
pub(crate) use session::tests::{recording_session, RecordingSink};

/// Port over raw byte endpoints
pub type PipePort = Port<PipeChannels>;

/// Port over decoded protocol connections
pub type ProtocolPort = Port<ProtocolChannels>;

/// Lifecycle status of a port
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortStatus {
    /// Not enabled, or disabled
    Disconnected,
    /// Enable or disable running
    InProgress,
    /// Transport open
    Connected,
    /// Last attempt failed; a retry is scheduled
    Error,
}

impl fmt::Display for PortStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Connected => write!(f, "connected"),
            Self::Error => write!(f, "error"),
        }
    }
}

struct PortInner<C: Channels> {
    id: String,
    config: PortConfig,
    adapter: Arc<dyn TransportAdapter>,
    channels: C,
    core: ProtocolCore,
    this: Weak<PortInner<C>>,

    status: Property<PortStatus>,
    error: Property<Option<Arc<PortError>>>,
    enabled: Property<bool>,
    tags: RwLock<BTreeSet<String>>,

    busy: AtomicBool,
    disposed: DisposeFlag,
    /// Bumped by every published error
    errors: AtomicU64,
    session: Mutex<CancellationToken>,
    reconnect: Mutex<Option<(u64, OwnedTimer)>>,
    reconnect_gen: AtomicU64,
    sweeper: Mutex<Option<OwnedTimer>>,
}

/// Releases the busy flag on drop
struct BusyGuard<C: Channels>(Arc<PortInner<C>>);

impl<C: Channels> Drop for BusyGuard<C> {
    fn drop(&mut self) {
        self.0.busy.store(false, Ordering::Release);
    }
}

impl<C: Channels> PortInner<C> {
    fn try_claim(self: &Arc<Self>, op: &'static str) -> Option<BusyGuard<C>> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(port = %self.id, op, "Port busy, dropping request");
            return None;
        }
        Some(BusyGuard(Arc::clone(self)))
    }

    /// Cancel the current session and start a new one
    fn renew_session(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let old = std::mem::replace(&mut *self.session.lock(), token.clone());
        old.cancel();
        token
    }

    fn cancel_reconnect(&self) {
        let pending = self.reconnect.lock().take();
        if let Some((_, timer)) = pending {
            timer.cancel();
            tracing::debug!(port = %self.id, "Pending reconnect cancelled");
        }
    }

    async fn enable_locked(self: &Arc<Self>) {
        if self.disposed.is_disposed() {
            tracing::debug!(port = %self.id, "Enable on disposed port ignored");
            return;
        }

        self.cancel_reconnect();
        self.enabled.set(true);
        self.status.set(PortStatus::InProgress);
        let token = self.renew_session();
        self.channels.clear();

        tracing::info!(port = %self.id, "Enabling port");
        let errors_before = self.errors.load(Ordering::Acquire);
        let sink: Weak<dyn PortSink> = self.this.clone();
        let session = Session::new(&self.id, token.clone(), sink);

        match self.adapter.open(session).await {
            Ok(()) => {
                if token.is_cancelled() || self.disposed.is_disposed() {
                    return;
                }
                // A link lost while opening already moved the port to Error
                if self.errors.load(Ordering::Acquire) != errors_before {
                    return;
                }
                self.status.set(PortStatus::Connected);
                tracing::info!(port = %self.id, "Port connected");
            }
            Err(e) => self.publish_error(e),
        }
    }

    async fn disable_locked(self: &Arc<Self>) {
        if self.disposed.is_disposed() {
            tracing::debug!(port = %self.id, "Disable on disposed port ignored");
            return;
        }

        self.cancel_reconnect();
        self.enabled.set(false);
        self.status.set(PortStatus::InProgress);
        self.session.lock().cancel();

        tracing::info!(port = %self.id, "Disabling port");
        let result = self.adapter.close().await;
        self.channels.clear();

        match result {
            Ok(()) => {
                self.status.set(PortStatus::Disconnected);
                tracing::info!(port = %self.id, "Port disconnected");
            }
            Err(e) => self.publish_error(e),
        }
    }

    fn publish_error(self: &Arc<Self>, error: TransportError) {
        if self.disposed.is_disposed() {
            return;
        }
        self.errors.fetch_add(1, Ordering::AcqRel);

        let error = Arc::new(PortError::transport(self.id.as_str(), error));
        tracing::warn!(
            port = %self.id,
            error = %error,
            retry_in = ?self.config.reconnect_timeout,
            "Port error"
        );
        self.error.set(Some(error));
        self.status.set(PortStatus::Error);
        self.arm_reconnect();
    }

    fn arm_reconnect(self: &Arc<Self>) {
        let generation = self.reconnect_gen.fetch_add(1, Ordering::AcqRel) + 1;
        let session = self.session.lock().clone();
        let weak = Arc::downgrade(self);

        // Hold the slot while arming so the callback cannot look before the
        // timer is stored
        let mut slot = self.reconnect.lock();
        let timer = OwnedTimer::once(
            self.core.handle(),
            self.config.reconnect_timeout,
            move || async move {
                if let Some(inner) = weak.upgrade() {
                    inner.on_reconnect(generation, session).await;
                }
            },
        );
        *slot = Some((generation, timer));
    }

    async fn on_reconnect(self: &Arc<Self>, generation: u64, session: CancellationToken) {
        {
            let mut slot = self.reconnect.lock();
            match slot.as_ref() {
                Some((current, _)) if *current == generation => {
                    slot.take();
                }
                _ => return,
            }
        }

        if self.disposed.is_disposed() || !self.enabled.get() {
            tracing::debug!(port = %self.id, "Reconnect skipped, port no longer enabled");
            return;
        }
        let Some(_guard) = self.try_claim("reconnect") else {
            // The open that failed is still running; try again later
            if !session.is_cancelled() {
                tracing::debug!(port = %self.id, "Port busy, reconnect re-armed");
                self.arm_reconnect();
            }
            return;
        };
        // Disable or a newer enable ended the session that failed
        if session.is_cancelled() || !self.enabled.get() {
            tracing::debug!(port = %self.id, "Reconnect skipped, session ended");
            return;
        }
        if self.status.get() != PortStatus::Error {
            tracing::debug!(port = %self.id, "Reconnect skipped, port recovered");
            return;
        }

        tracing::info!(port = %self.id, "Reconnecting");
        self.enable_locked().await;
    }

    fn watch_critical(
        &self,
        link_id: String,
        mut alive: watch::Receiver<bool>,
        token: CancellationToken,
    ) {
        let weak = self.this.clone();
        self.core.handle().spawn(async move {
            let _ = alive.wait_for(|alive| !alive).await;
            if token.is_cancelled() {
                return;
            }
            if let Some(inner) = weak.upgrade() {
                tracing::warn!(port = %inner.id, link = %link_id, "Link lost");
                inner.publish_error(TransportError::ConnectionClosed);
            }
        });
    }

    fn close_properties(&self) {
        self.status.close();
        self.error.close();
        self.enabled.close();
    }
}

impl<C: Channels> PortSink for PortInner<C> {
    fn attach_link(&self, link: RawLink, token: &CancellationToken) -> bool {
        if self.disposed.is_disposed() {
            return false;
        }
        let critical = link.critical;
        let link_id = link.id.clone();
        let Some(alive) = self.channels.attach(link, token) else {
            return false;
        };
        if critical {
            self.watch_critical(link_id, alive, token.clone());
        }
        true
    }

    fn publish(&self, error: TransportError) {
        if let Some(inner) = self.this.upgrade() {
            inner.publish_error(error);
        }
    }

    fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

/// A reconnecting transport with a uniform lifecycle
///
/// Dropping the port disposes it.
pub struct Port<C: Channels> {
    inner: Arc<PortInner<C>>,
}

impl<C: Channels> Port<C> {
    /// Build a port around `adapter`
    ///
    /// Ports whose channels need periodic reclamation get their sweep timer
    /// armed here.
    pub fn new(
        config: PortConfig,
        adapter: Arc<dyn TransportAdapter>,
        channels: C,
        core: ProtocolCore,
    ) -> Self {
        let id = config.id();
        let inner = Arc::new_cyclic(|this| PortInner {
            id,
            config,
            adapter,
            channels,
            core,
            this: this.clone(),
            status: Property::new(PortStatus::Disconnected),
            error: Property::new(None),
            enabled: Property::new(false),
            tags: RwLock::new(BTreeSet::new()),
            busy: AtomicBool::new(false),
            disposed: DisposeFlag::new(),
            errors: AtomicU64::new(0),
            session: Mutex::new(CancellationToken::new()),
            reconnect: Mutex::new(None),
            reconnect_gen: AtomicU64::new(0),
            sweeper: Mutex::new(None),
        });

        if inner.channels.periodic_sweep() {
            let weak = Arc::downgrade(&inner);
            let timer = OwnedTimer::periodic(
                inner.core.handle(),
                inner.config.sweep_interval,
                move || {
                    let weak = weak.clone();
                    async move {
                        if let Some(inner) = weak.upgrade() {
                            if !inner.disposed.is_disposed() {
                                inner.channels.sweep();
                            }
                        }
                    }
                },
            );
            *inner.sweeper.lock() = Some(timer);
        }

        tracing::debug!(port = %inner.id, "Port created");
        Self { inner }
    }

    /// Stable port id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Validated configuration
    #[must_use]
    pub fn config(&self) -> &PortConfig {
        &self.inner.config
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> PortStatus {
        self.inner.status.get()
    }

    /// Status changes, starting with the current one
    #[must_use]
    pub fn on_status(&self) -> PropertyStream<PortStatus> {
        self.inner.status.subscribe()
    }

    /// Most recent error, if any
    #[must_use]
    pub fn error(&self) -> Option<Arc<PortError>> {
        self.inner.error.get()
    }

    /// Error changes, starting with the current one
    #[must_use]
    pub fn on_error(&self) -> PropertyStream<Option<Arc<PortError>>> {
        self.inner.error.subscribe()
    }

    /// Whether the port is meant to be running
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.get()
    }

    /// IsEnabled changes, starting with the current one
    #[must_use]
    pub fn on_enabled(&self) -> PropertyStream<bool> {
        self.inner.enabled.subscribe()
    }

    /// Labels, sorted
    #[must_use]
    pub fn tags(&self) -> Vec<String> {
        self.inner.tags.read().iter().cloned().collect()
    }

    /// Attach a label; `false` if already present
    pub fn add_tag(&self, tag: impl Into<String>) -> bool {
        self.inner.tags.write().insert(tag.into())
    }

    /// Detach a label; `false` if absent
    pub fn remove_tag(&self, tag: &str) -> bool {
        self.inner.tags.write().remove(tag)
    }

    /// Whether `tag` is attached
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.inner.tags.read().contains(tag)
    }

    /// Traffic counters of this port
    #[must_use]
    pub fn statistics(&self) -> StatisticsSnapshot {
        self.inner.channels.statistics().snapshot()
    }

    /// Number of live endpoints or connections
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.inner.channels.len()
    }

    /// Local address of a listening or connected socket
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.adapter.local_addr()
    }

    /// Start the port in the background
    ///
    /// Dropped when an enable or disable is already running.
    pub fn enable(&self) {
        let Some(guard) = self.inner.try_claim("enable") else {
            return;
        };
        let inner = Arc::clone(&self.inner);
        self.inner.core.handle().spawn(async move {
            let _guard = guard;
            inner.enable_locked().await;
        });
    }

    /// Stop the port in the background
    ///
    /// Dropped when an enable or disable is already running.
    pub fn disable(&self) {
        let Some(guard) = self.inner.try_claim("disable") else {
            return;
        };
        let inner = Arc::clone(&self.inner);
        self.inner.core.handle().spawn(async move {
            let _guard = guard;
            inner.disable_locked().await;
        });
    }

    /// Run enable to completion
    ///
    /// Returns `false` if it was dropped because the port was busy.
    pub async fn enable_now(&self) -> bool {
        let Some(_guard) = self.inner.try_claim("enable") else {
            return false;
        };
        self.inner.enable_locked().await;
        true
    }

    /// Run disable to completion
    ///
    /// Returns `false` if it was dropped because the port was busy.
    pub async fn disable_now(&self) -> bool {
        let Some(_guard) = self.inner.try_claim("disable") else {
            return false;
        };
        self.inner.disable_locked().await;
        true
    }

    /// Record a transport failure: Error status plus a scheduled retry
    ///
    /// No-op once the port is disposed.
    pub fn publish_error(&self, error: TransportError) {
        self.inner.publish_error(error);
    }

    /// Wait until the port is Connected
    ///
    /// # Errors
    ///
    /// `PortError::Timeout` after `timeout`, `PortError::Cancelled` when
    /// `cancel` fires, `PortError::Disposed` if the port is or becomes
    /// disposed.
    pub async fn wait_connected(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), PortError> {
        if self.is_disposed() {
            return Err(PortError::Disposed(self.inner.id.clone()));
        }
        let mut status = self.inner.status.subscribe();
        let connected = status.wait_for(|s| *s == PortStatus::Connected);

        tokio::select! {
            () = cancel.cancelled() => Err(PortError::Cancelled(self.inner.id.clone())),
            result = tokio::time::timeout(timeout, connected) => match result {
                Ok(Some(_)) => Ok(()),
                Ok(None) => Err(PortError::Disposed(self.inner.id.clone())),
                Err(_) => Err(PortError::Timeout {
                    port: self.inner.id.clone(),
                    timeout,
                }),
            },
        }
    }

    /// Whether disposal has begun
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.is_disposed()
    }

    /// Number of dispose calls so far, including ignored repeats
    #[must_use]
    pub fn dispose_attempts(&self) -> u32 {
        self.inner.disposed.attempts()
    }

    /// Tear the port down; adapter close runs in the background
    pub fn dispose(&self) {
        let inner = &self.inner;
        if !inner.disposed.try_begin(&inner.id) {
            return;
        }
        tracing::info!(port = %inner.id, "Disposing port");

        inner.session.lock().cancel();
        inner.cancel_reconnect();
        inner.sweeper.lock().take();

        let adapter = Arc::clone(&inner.adapter);
        let id = inner.id.clone();
        inner.core.handle().spawn(async move {
            if let Err(e) = adapter.close().await {
                tracing::warn!(port = %id, error = %e, "Adapter close failed during dispose");
            }
        });

        inner.channels.dispose();
        inner.close_properties();
    }

    /// Tear the port down, awaiting adapter close and channel shutdown
    pub async fn dispose_async(&self) {
        let inner = &self.inner;
        if !inner.disposed.try_begin(&inner.id) {
            return;
        }
        tracing::info!(port = %inner.id, "Disposing port");

        inner.session.lock().cancel();
        inner.cancel_reconnect();
        inner.sweeper.lock().take();

        if let Err(e) = inner.adapter.close().await {
            tracing::warn!(port = %inner.id, error = %e, "Adapter close failed during dispose");
        }

        inner.channels.dispose_async().await;
        inner.close_properties();
    }
}

impl<C: Channels> fmt::Debug for Port<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .field("enabled", &self.is_enabled())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl<C: Channels> Drop for Port<C> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests;
