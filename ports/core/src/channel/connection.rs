//! Protocol connections
//!
//! A [`StreamConnection`] decodes inbound bytes with every parser its
//! factory produced, runs decoded messages through the inbound filters and
//! publishes them. Outbound messages go through the outbound filters, are
//! encoded and written.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use super::{LinkIo, RawLink};
use crate::codec::{apply_filters, Direction, MessageRef, ParserFactory, RouteFilter};
use crate::error::TransportError;
use crate::stats::PortStatistics;

/// Messages buffered per subscriber
const MESSAGE_CAPACITY: usize = 256;

/// A live protocol channel owned by a protocol port
#[async_trait]
pub trait Connection: Send + Sync {
    /// Link id
    fn id(&self) -> &str;

    /// Whether the channel is open
    fn is_connected(&self) -> bool;

    /// Liveness signal; turns `false` once and stays there
    fn on_connected(&self) -> watch::Receiver<bool>;

    /// Decoded inbound messages, after filtering
    fn on_rx(&self) -> broadcast::Receiver<MessageRef>;

    /// Messages successfully sent, after filtering
    fn on_tx(&self) -> broadcast::Receiver<MessageRef>;

    /// Filter, encode and write one message
    ///
    /// A message dropped by an outbound filter counts as sent.
    async fn send(&self, message: MessageRef, cancel: &CancellationToken)
        -> Result<(), TransportError>;

    /// Close the channel; idempotent
    fn dispose(&self);

    /// Close the channel, shutting the write side down cleanly
    async fn dispose_async(&self) -> Result<(), TransportError> {
        self.dispose();
        Ok(())
    }
}

/// [`Connection`] over a [`RawLink`]
pub struct StreamConnection {
    io: Arc<LinkIo>,
    rx: broadcast::Sender<MessageRef>,
    tx: broadcast::Sender<MessageRef>,
    filters: Arc<[Arc<dyn RouteFilter>]>,
    stats: Arc<PortStatistics>,
}

impl StreamConnection {
    /// Start decoding `link`
    pub fn start(
        link: RawLink,
        handle: &Handle,
        session: &CancellationToken,
        stats: Arc<PortStatistics>,
        filters: Arc<[Arc<dyn RouteFilter>]>,
        parsers: &dyn ParserFactory,
    ) -> Arc<Self> {
        let (rx, _) = broadcast::channel(MESSAGE_CAPACITY);
        let (tx, _) = broadcast::channel(MESSAGE_CAPACITY);

        let mut parsers = parsers.create();
        let link_id = link.id.clone();
        let rx_out = rx.clone();
        let rx_filters = Arc::clone(&filters);
        let rx_stats = Arc::clone(&stats);

        let io = LinkIo::start(link, handle, session, Arc::clone(&stats), move |data| {
            for parser in &mut parsers {
                parser.push(data);
                loop {
                    match parser.decode() {
                        Ok(Some(message)) => {
                            match apply_filters(&rx_filters, Direction::Inbound, &link_id, message)
                            {
                                Some(message) => {
                                    rx_stats.add_rx_messages(1);
                                    let _ = rx_out.send(message);
                                }
                                None => rx_stats.add_dropped(1),
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            rx_stats.add_parser_errors(1);
                            tracing::debug!(
                                connection = %link_id,
                                protocol = parser.protocol(),
                                error = %e,
                                "Dropping undecodable input"
                            );
                        }
                    }
                }
            }
        });

        Arc::new(Self {
            io,
            rx,
            tx,
            filters,
            stats,
        })
    }
}

#[async_trait]
impl Connection for StreamConnection {
    fn id(&self) -> &str {
        self.io.id()
    }

    fn is_connected(&self) -> bool {
        self.io.is_alive()
    }

    fn on_connected(&self) -> watch::Receiver<bool> {
        self.io.liveness()
    }

    fn on_rx(&self) -> broadcast::Receiver<MessageRef> {
        self.rx.subscribe()
    }

    fn on_tx(&self) -> broadcast::Receiver<MessageRef> {
        self.tx.subscribe()
    }

    async fn send(
        &self,
        message: MessageRef,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        let Some(message) = apply_filters(&self.filters, Direction::Outbound, self.id(), message)
        else {
            self.stats.add_dropped(1);
            return Ok(());
        };

        let mut buf = Vec::new();
        message.encode(&mut buf)?;

        tokio::select! {
            () = cancel.cancelled() => return Err(TransportError::Cancelled),
            result = self.io.write(&buf) => result?,
        }

        self.stats.add_tx_messages(1);
        let _ = self.tx.send(message);
        Ok(())
    }

    fn dispose(&self) {
        self.io.dispose();
    }

    async fn dispose_async(&self) -> Result<(), TransportError> {
        self.io.dispose_async().await
    }
}
