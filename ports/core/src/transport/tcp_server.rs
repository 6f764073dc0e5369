//! TCP server adapter
//!
//! `open` binds and starts an accept loop. Every accepted peer becomes a
//! link named `<port id>/<peer addr>`. The loop runs until the session ends,
//! `close` is called, or accept fails with a non-transient error, which is
//! reported through the session.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::TransportAdapter;
use crate::channel::RawLink;
use crate::error::TransportError;
use crate::port::Session;

struct AcceptLoop {
    stop: CancellationToken,
    task: JoinHandle<()>,
    local: SocketAddr,
}

/// Listens on `host:port` and accepts any number of peers
pub struct TcpServerAdapter {
    id: String,
    host: String,
    port: u16,
    max_connections: usize,
    state: Mutex<Option<AcceptLoop>>,
}

impl TcpServerAdapter {
    /// Adapter for the port `id`; `max_connections == 0` means unlimited
    pub fn new(id: String, host: String, port: u16, max_connections: usize) -> Self {
        Self {
            id,
            host,
            port,
            max_connections,
            state: Mutex::new(None),
        }
    }

    async fn stop_loop(&self) {
        let current = self.state.lock().take();
        if let Some(accept) = current {
            accept.stop.cancel();
            if let Err(e) = accept.task.await {
                tracing::warn!(port = %self.id, error = %e, "Accept loop ended abnormally");
            }
            tracing::debug!(port = %self.id, local = %accept.local, "Listener closed");
        }
    }
}

#[async_trait]
impl TransportAdapter for TcpServerAdapter {
    async fn open(&self, session: Session) -> Result<(), TransportError> {
        // A previous session's listener must release the address first
        self.stop_loop().await;

        let listener = TcpListener::bind((self.host.as_str(), self.port)).await?;
        let local = listener.local_addr()?;
        tracing::info!(port = %self.id, %local, "Listening");

        let stop = session.token().child_token();
        let task = tokio::spawn(accept_loop(
            listener,
            session,
            stop.clone(),
            self.id.clone(),
            self.max_connections,
        ));
        *self.state.lock() = Some(AcceptLoop { stop, task, local });
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.stop_loop().await;
        Ok(())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().as_ref().map(|accept| accept.local)
    }
}

async fn accept_loop(
    listener: TcpListener,
    session: Session,
    stop: CancellationToken,
    id: String,
    max_connections: usize,
) {
    loop {
        let accepted = tokio::select! {
            () = stop.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                if max_connections > 0 && session.channel_count() >= max_connections {
                    tracing::warn!(
                        port = %id,
                        %peer,
                        max_connections,
                        "Connection limit reached, rejecting peer"
                    );
                    continue;
                }
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(port = %id, %peer, error = %e, "Failed to set TCP_NODELAY");
                }
                tracing::debug!(port = %id, %peer, "Peer accepted");
                if !session.attach(RawLink::new(format!("{id}/{peer}"), stream)) {
                    break;
                }
            }
            Err(e) if is_transient(&e) => {
                tracing::debug!(port = %id, error = %e, "Transient accept error");
            }
            Err(e) => {
                tracing::error!(port = %id, error = %e, "Accept failed, stopping listener");
                session.publish_error(TransportError::Io(e));
                break;
            }
        }
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{recording_session, RecordingSink};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpStream;

    fn adapter(max_connections: usize) -> TcpServerAdapter {
        TcpServerAdapter::new(
            "tcp_s://127.0.0.1:0".into(),
            "127.0.0.1".into(),
            0,
            max_connections,
        )
    }

    async fn wait_links(sink: &RecordingSink, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while sink.links.lock().len() < n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_accepts_peers_as_links() {
        let server = adapter(0);
        let sink = Arc::new(RecordingSink::default());
        server.open(recording_session(&sink)).await.unwrap();
        let addr = server.local_addr().unwrap();

        let _a = TcpStream::connect(addr).await.unwrap();
        let _b = TcpStream::connect(addr).await.unwrap();
        wait_links(&sink, 2).await;

        let links = sink.links.lock();
        assert!(links.iter().all(|l| !l.critical));
        assert!(links[0].id.starts_with("tcp_s://127.0.0.1:0/127.0.0.1:"));
        drop(links);

        server.close().await.unwrap();
        assert!(server.local_addr().is_none());
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let server = adapter(1);
        let sink = Arc::new(RecordingSink::default());
        server.open(recording_session(&sink)).await.unwrap();
        let addr = server.local_addr().unwrap();

        let _a = TcpStream::connect(addr).await.unwrap();
        wait_links(&sink, 1).await;
        let _b = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(sink.links.lock().len(), 1);
        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_session_end_stops_accepting() {
        let server = adapter(0);
        let sink = Arc::new(RecordingSink::default());
        let session = recording_session(&sink);
        server.open(session.clone()).await.unwrap();
        let addr = server.local_addr().unwrap();

        session.token().cancel();
        server.close().await.unwrap();
        assert!(TcpStream::connect(addr).await.is_err());
        assert!(sink.links.lock().is_empty());
    }
}
