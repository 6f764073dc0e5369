//! Enable sessions
//!
//! Every successful `enable` starts a session identified by a fresh
//! cancellation token. Adapters receive a [`Session`] and use it to hand
//! links to the port and to report failures that happen after `open`
//! returned (a dying accept loop, for example).
//!
//! Once the session token is cancelled (by `disable`, a newer `enable` or
//! disposal) the session goes stale: attached links are closed immediately
//! and reported errors are ignored.

use std::fmt;
use std::sync::{Arc, Weak};

use tokio_util::sync::CancellationToken;

use crate::channel::RawLink;
use crate::error::TransportError;

/// Port-side receiver of a session's links and errors
pub(crate) trait PortSink: Send + Sync {
    /// Wrap and register `link`; `false` if it was rejected
    fn attach_link(&self, link: RawLink, token: &CancellationToken) -> bool;

    /// Route a transport failure into the port's error handling
    fn publish(&self, error: TransportError);

    /// Live channels currently registered
    fn channel_count(&self) -> usize;
}

/// Handle an adapter uses for one enable session
#[derive(Clone)]
pub struct Session {
    port: Arc<str>,
    token: CancellationToken,
    sink: Weak<dyn PortSink>,
}

impl Session {
    pub(crate) fn new(port: &str, token: CancellationToken, sink: Weak<dyn PortSink>) -> Self {
        Self {
            port: Arc::from(port),
            token,
            sink,
        }
    }

    /// Id of the owning port
    #[must_use]
    pub fn port_id(&self) -> &str {
        &self.port
    }

    /// Cancelled when the session ends
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether the session is still current
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled() && self.sink.strong_count() > 0
    }

    /// Hand a freshly opened link to the port
    ///
    /// Returns `false` when the session is stale or the port is gone; the
    /// link is dropped, which closes it.
    pub fn attach(&self, link: RawLink) -> bool {
        if self.token.is_cancelled() {
            tracing::debug!(port = %self.port, link = %link.id, "Session ended, dropping link");
            return false;
        }
        match self.sink.upgrade() {
            Some(sink) => sink.attach_link(link, &self.token),
            None => false,
        }
    }

    /// Live channels of the owning port; 0 once it is gone
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.sink.upgrade().map_or(0, |sink| sink.channel_count())
    }

    /// Report a failure that happened outside `open`
    pub fn publish_error(&self, error: TransportError) {
        if self.token.is_cancelled() {
            tracing::debug!(port = %self.port, error = %error, "Ignoring error from ended session");
            return;
        }
        if let Some(sink) = self.sink.upgrade() {
            sink.publish(error);
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("port", &self.port)
            .field("active", &self.is_active())
            .finish()
    }
}
