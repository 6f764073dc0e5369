//! Live Channels
//!
//! A transport adapter produces [`RawLink`]s: a duplex byte stream plus an
//! id. The owning port wraps each link into either
//! - a [`StreamEndpoint`] (pipe ports: raw byte chunks in, bytes out), or
//! - a [`StreamConnection`] (protocol ports: decoded messages in, messages
//!   out, route filters on both directions).
//!
//! Both share [`LinkIo`]: one reader task per link and a serialized writer.
//! Every link is shut down by its own token, a child of the enable session
//! token, so cancelling the session closes every link it produced.

pub mod connection;
pub mod endpoint;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter, WriteHalf};
use tokio::runtime::Handle;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::dispose::DisposeFlag;
use crate::error::TransportError;
use crate::stats::PortStatistics;

pub use connection::{Connection, StreamConnection};
pub use endpoint::{Endpoint, StreamEndpoint};

/// Read chunk size
const READ_CHUNK: usize = 4096;

/// Default write buffer size for links that do not specify one
pub const DEFAULT_LINK_WRITE_BUFFER: usize = 8192;

/// Byte stream a link runs over
pub trait LinkStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> LinkStream for T {}

/// Freshly opened transport channel, not yet owned by a port
pub struct RawLink {
    /// `<port id>` or `<port id>/<peer>`
    pub id: String,
    /// Underlying stream
    pub stream: Box<dyn LinkStream>,
    /// Losing this link means the port lost its transport
    pub critical: bool,
    /// Write buffer size in bytes
    pub write_buffer: usize,
    /// Bound on a single write, if any
    pub write_timeout: Option<Duration>,
}

impl RawLink {
    /// Wrap a stream
    pub fn new(id: impl Into<String>, stream: impl LinkStream + 'static) -> Self {
        Self {
            id: id.into(),
            stream: Box::new(stream),
            critical: false,
            write_buffer: DEFAULT_LINK_WRITE_BUFFER,
            write_timeout: None,
        }
    }

    /// Mark as the single link of its port
    #[must_use]
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// Override the write buffer size
    #[must_use]
    pub fn with_write_buffer(mut self, bytes: usize) -> Self {
        self.write_buffer = bytes.max(1);
        self
    }

    /// Bound every write
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }
}

impl fmt::Debug for RawLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawLink")
            .field("id", &self.id)
            .field("critical", &self.critical)
            .field("write_buffer", &self.write_buffer)
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}

type LinkWriter = BufWriter<WriteHalf<Box<dyn LinkStream>>>;

/// Reader task and writer shared by endpoints and connections
pub(crate) struct LinkIo {
    id: String,
    writer: Mutex<Option<LinkWriter>>,
    write_timeout: Option<Duration>,
    alive: watch::Sender<bool>,
    shutdown: CancellationToken,
    disposed: DisposeFlag,
    stats: Arc<PortStatistics>,
}

impl LinkIo {
    /// Split the link and start its reader
    ///
    /// `on_bytes` runs on the reader task for every chunk read.
    pub(crate) fn start<F>(
        link: RawLink,
        handle: &Handle,
        session: &CancellationToken,
        stats: Arc<PortStatistics>,
        mut on_bytes: F,
    ) -> Arc<Self>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        let (mut reader, writer) = tokio::io::split(link.stream);
        let (alive, _) = watch::channel(true);
        let io = Arc::new(Self {
            id: link.id,
            writer: Mutex::new(Some(BufWriter::with_capacity(link.write_buffer, writer))),
            write_timeout: link.write_timeout,
            alive,
            shutdown: session.child_token(),
            disposed: DisposeFlag::new(),
            stats,
        });

        let task_io = Arc::clone(&io);
        handle.spawn(async move {
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                tokio::select! {
                    () = task_io.shutdown.cancelled() => break,
                    read = reader.read(&mut buf) => match read {
                        Ok(0) => {
                            tracing::debug!(link = %task_io.id, "Link closed by peer");
                            break;
                        }
                        Ok(n) => {
                            task_io.stats.add_rx_bytes(n as u64);
                            on_bytes(&buf[..n]);
                        }
                        Err(e) => {
                            tracing::warn!(link = %task_io.id, error = %e, "Link read error");
                            break;
                        }
                    }
                }
            }
            task_io.mark_closed();
        });

        io
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn is_alive(&self) -> bool {
        *self.alive.borrow() && !self.disposed.is_disposed()
    }

    pub(crate) fn liveness(&self) -> watch::Receiver<bool> {
        self.alive.subscribe()
    }

    fn mark_closed(&self) {
        self.shutdown.cancel();
        self.alive.send_if_modified(|alive| std::mem::replace(alive, false));
    }

    /// Write and flush `data`
    pub(crate) async fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        if self.shutdown.is_cancelled() {
            return Err(TransportError::ConnectionClosed);
        }

        let result = {
            let mut guard = self.writer.lock().await;
            let writer = guard.as_mut().ok_or(TransportError::ConnectionClosed)?;
            let write = async {
                writer.write_all(data).await?;
                writer.flush().await
            };
            tokio::select! {
                () = self.shutdown.cancelled() => Err(TransportError::ConnectionClosed),
                r = with_timeout(self.write_timeout, write) => r,
            }
        };

        match result {
            Ok(()) => {
                self.stats.add_tx_bytes(data.len() as u64);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(link = %self.id, error = %e, "Link write failed");
                self.mark_closed();
                Err(e)
            }
        }
    }

    pub(crate) fn dispose(&self) {
        if !self.disposed.try_begin(&self.id) {
            return;
        }
        self.mark_closed();
        // A write in flight holds the lock; it fails on the cancelled token
        // and the stream closes when the last reference drops
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }
        tracing::debug!(link = %self.id, "Link disposed");
    }

    pub(crate) async fn dispose_async(&self) -> Result<(), TransportError> {
        if !self.disposed.try_begin(&self.id) {
            return Ok(());
        }
        self.mark_closed();
        let writer = self.writer.lock().await.take();
        tracing::debug!(link = %self.id, "Link disposed");
        if let Some(mut writer) = writer {
            writer.shutdown().await?;
        }
        Ok(())
    }
}

async fn with_timeout(
    timeout: Option<std::time::Duration>,
    write: impl std::future::Future<Output = std::io::Result<()>>,
) -> Result<(), TransportError> {
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, write).await {
            Ok(result) => result.map_err(TransportError::from),
            Err(_) => Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("write timed out after {limit:?}"),
            ))),
        },
        None => write.await.map_err(TransportError::from),
    }
}

/// Identity comparison for shared channel handles
pub(crate) fn same_channel<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
