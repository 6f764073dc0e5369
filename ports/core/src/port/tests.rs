use std::collections::VecDeque;
use std::io;
use std::sync::atomic::AtomicUsize;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio::sync::Notify;

use super::*;
use crate::codec::{FrameParser, MessageParser, ParserFactory};

/// Adapter whose opens follow a script of outcomes
///
/// Successful opens attach one duplex link and keep the far end in `peers`.
#[derive(Default)]
struct ScriptedAdapter {
    script: Mutex<VecDeque<bool>>,
    critical: bool,
    gate: Option<Arc<Notify>>,
    hangup_during_open: Mutex<Option<Duration>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    peers: Mutex<Vec<DuplexStream>>,
}

impl ScriptedAdapter {
    fn new(script: &[bool]) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.iter().copied().collect()),
            critical: true,
            ..Self::default()
        })
    }

    fn gated(gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            critical: true,
            gate: Some(gate),
            ..Self::default()
        })
    }

    /// First open loses its link at once and then stalls for `stall`
    fn hangup_during_open(stall: Duration) -> Arc<Self> {
        Arc::new(Self {
            critical: true,
            hangup_during_open: Mutex::new(Some(stall)),
            ..Self::default()
        })
    }

    fn non_critical() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportAdapter for ScriptedAdapter {
    async fn open(&self, session: Session) -> Result<(), TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if !self.script.lock().pop_front().unwrap_or(true) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused").into());
        }

        let (near, far) = tokio::io::duplex(1024);
        let mut link = RawLink::new(session.port_id(), near);
        if self.critical {
            link = link.critical();
        }
        self.peers.lock().push(far);
        if !session.attach(link) {
            return Err(TransportError::Cancelled);
        }
        let hangup = self.hangup_during_open.lock().take();
        if let Some(stall) = hangup {
            self.peers.lock().clear();
            tokio::time::sleep(stall).await;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

const CS: &str = "tcp_c://127.0.0.1:1?reconnect=100&sweep=100";

fn frames() -> Arc<dyn ParserFactory> {
    Arc::new(|| -> Vec<Box<dyn MessageParser>> { vec![Box::new(FrameParser::new())] })
}

fn protocol_port(adapter: &Arc<ScriptedAdapter>) -> ProtocolPort {
    let core = ProtocolCore::current();
    let config = PortConfig::parse(CS).unwrap();
    let channels = ProtocolChannels::new(
        &config.id(),
        core.handle().clone(),
        core.port_statistics(),
        Vec::new(),
        frames(),
    );
    Port::new(config, adapter.clone(), channels, core)
}

fn pipe_port(adapter: &Arc<ScriptedAdapter>) -> PipePort {
    let core = ProtocolCore::current();
    let config = PortConfig::parse(CS).unwrap();
    let channels = PipeChannels::new(&config.id(), core.handle().clone(), core.port_statistics());
    Port::new(config, adapter.clone(), channels, core)
}

async fn take(stream: &mut PropertyStream<PortStatus>, n: usize) -> Vec<PortStatus> {
    let mut seen = Vec::with_capacity(n);
    for _ in 0..n {
        seen.push(stream.next().await.unwrap());
    }
    seen
}

#[tokio::test(start_paused = true)]
async fn test_enable_reports_in_order() {
    let adapter = ScriptedAdapter::new(&[]);
    let port = protocol_port(&adapter);
    let mut status = port.on_status();

    assert!(port.enable_now().await);

    assert_eq!(
        take(&mut status, 3).await,
        vec![PortStatus::Disconnected, PortStatus::InProgress, PortStatus::Connected]
    );
    assert!(port.is_enabled());
    assert_eq!(port.channel_count(), 1);
    assert!(port.error().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_disable_closes_channels() {
    let adapter = ScriptedAdapter::new(&[]);
    let port = protocol_port(&adapter);
    port.enable_now().await;
    let mut status = port.on_status();

    assert!(port.disable_now().await);

    assert_eq!(
        take(&mut status, 3).await,
        vec![PortStatus::Connected, PortStatus::InProgress, PortStatus::Disconnected]
    );
    assert!(!port.is_enabled());
    assert_eq!(port.channel_count(), 0);
    assert_eq!(adapter.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_busy_port_drops_requests() {
    let gate = Arc::new(Notify::new());
    let adapter = ScriptedAdapter::gated(gate.clone());
    let port = protocol_port(&adapter);

    port.enable();
    // The background enable holds the busy flag until open returns
    assert!(!port.enable_now().await);
    assert!(!port.disable_now().await);
    port.disable();

    gate.notify_one();
    port.wait_connected(Duration::from_secs(1), &CancellationToken::new())
        .await
        .unwrap();
    assert!(port.is_enabled());
    assert_eq!(adapter.opens(), 1);

    // Released again once the enable finished
    assert!(port.disable_now().await);
    assert_eq!(port.status(), PortStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_failed_open_retries_after_delay() {
    let adapter = ScriptedAdapter::new(&[false, true]);
    let port = protocol_port(&adapter);
    let mut status = port.on_status();

    port.enable_now().await;
    assert_eq!(port.status(), PortStatus::Error);
    let error = port.error().unwrap();
    assert!(matches!(
        &*error,
        PortError::Transport { port: id, source: TransportError::Io(_) } if id == "tcp_c://127.0.0.1:1"
    ));
    assert_eq!(adapter.opens(), 1);

    port.wait_connected(Duration::from_secs(1), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(adapter.opens(), 2);
    assert_eq!(
        take(&mut status, 5).await,
        vec![
            PortStatus::Disconnected,
            PortStatus::InProgress,
            PortStatus::Error,
            PortStatus::InProgress,
            PortStatus::Connected,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_disable_during_retry_delay_cancels_retry() {
    let adapter = ScriptedAdapter::new(&[false]);
    let port = protocol_port(&adapter);

    port.enable_now().await;
    assert_eq!(port.status(), PortStatus::Error);
    port.disable_now().await;

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(adapter.opens(), 1);
    assert_eq!(port.status(), PortStatus::Disconnected);
    assert!(!port.is_enabled());
}

#[tokio::test(start_paused = true)]
async fn test_lost_link_reconnects() {
    let adapter = ScriptedAdapter::new(&[]);
    let port = protocol_port(&adapter);
    port.enable_now().await;
    let mut status = port.on_status();

    // Peer hangs up
    adapter.peers.lock().clear();

    assert_eq!(
        take(&mut status, 4).await,
        vec![
            PortStatus::Connected,
            PortStatus::Error,
            PortStatus::InProgress,
            PortStatus::Connected,
        ]
    );
    assert!(matches!(
        port.error().as_deref(),
        Some(PortError::Transport { source: TransportError::ConnectionClosed, .. })
    ));
    assert_eq!(adapter.opens(), 2);
    assert_eq!(port.channel_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_link_lost_during_slow_open_still_reconnects() {
    // The retry comes due while the first open still holds the busy flag
    let adapter = ScriptedAdapter::hangup_during_open(Duration::from_millis(350));
    let port = protocol_port(&adapter);

    port.enable();
    let never = CancellationToken::new();
    port.wait_connected(Duration::from_secs(5), &never)
        .await
        .unwrap();

    assert_eq!(adapter.opens(), 2);
    assert!(port.is_enabled());
    assert!(matches!(
        port.error().as_deref(),
        Some(PortError::Transport { source: TransportError::ConnectionClosed, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_disabled_link_loss_is_not_an_error() {
    let adapter = ScriptedAdapter::new(&[]);
    let port = protocol_port(&adapter);
    port.enable_now().await;
    port.disable_now().await;

    adapter.peers.lock().clear();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(port.status(), PortStatus::Disconnected);
    assert!(port.error().is_none());
    assert_eq!(adapter.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dispose_is_idempotent() {
    let adapter = ScriptedAdapter::new(&[]);
    let port = protocol_port(&adapter);
    port.enable_now().await;

    port.dispose();
    port.dispose();
    port.dispose_async().await;

    assert!(port.is_disposed());
    assert_eq!(port.dispose_attempts(), 3);
    assert_eq!(port.channel_count(), 0);

    // Lifecycle calls after disposal do nothing
    port.enable_now().await;
    port.publish_error(TransportError::ConnectionClosed);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(adapter.opens(), 1);
    assert!(port.error().is_none());

    let sent = port
        .send(
            Arc::new(crate::codec::FrameMessage::new("ping", serde_json::json!({}))),
            &CancellationToken::new(),
        )
        .await;
    assert!(matches!(sent, Err(PortError::Disposed(_))));
}

#[tokio::test(start_paused = true)]
async fn test_dispose_cancels_pending_retry() {
    let adapter = ScriptedAdapter::new(&[false]);
    let port = protocol_port(&adapter);
    port.enable_now().await;
    assert_eq!(port.status(), PortStatus::Error);

    port.dispose_async().await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(adapter.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_wait_connected_failures() {
    let adapter = ScriptedAdapter::gated(Arc::new(Notify::new()));
    let port = protocol_port(&adapter);

    let timed_out = port
        .wait_connected(Duration::from_millis(50), &CancellationToken::new())
        .await;
    assert!(matches!(timed_out, Err(PortError::Timeout { .. })));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let cancelled = port.wait_connected(Duration::from_secs(5), &cancel).await;
    assert!(matches!(cancelled, Err(PortError::Cancelled(_))));

    let never = CancellationToken::new();
    let (waited, ()) = tokio::join!(
        port.wait_connected(Duration::from_secs(5), &never),
        async { port.dispose() },
    );
    assert!(matches!(waited, Err(PortError::Disposed(_))));

    let after = port
        .wait_connected(Duration::from_secs(5), &CancellationToken::new())
        .await;
    assert!(matches!(after, Err(PortError::Disposed(_))));
}

#[tokio::test]
async fn test_tags() {
    let port = protocol_port(&ScriptedAdapter::new(&[]));
    assert!(port.add_tag("uplink"));
    assert!(port.add_tag("gcs"));
    assert!(!port.add_tag("gcs"));
    assert!(port.has_tag("uplink"));
    assert_eq!(port.tags(), vec!["gcs".to_string(), "uplink".to_string()]);

    assert!(port.remove_tag("uplink"));
    assert!(!port.remove_tag("uplink"));
    assert_eq!(port.tags(), vec!["gcs".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_pipe_port_write_and_sweep() {
    let adapter = ScriptedAdapter::non_critical();
    let port = pipe_port(&adapter);
    port.enable_now().await;
    assert_eq!(port.endpoints().len(), 1);

    assert_eq!(port.write(b"ping").await.unwrap(), 1);
    let mut peer = adapter.peers.lock().pop().unwrap();
    let mut buf = [0_u8; 4];
    peer.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");
    assert_eq!(port.statistics().tx_bytes, 4);

    // A non-critical endpoint going away leaves the port connected
    drop(peer);
    let endpoint = port.endpoints()[0].clone();
    while !endpoint.is_disposed() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(port.status(), PortStatus::Connected);

    // The periodic sweep reclaims it
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(port.channel_count(), 0);
    assert_eq!(port.sweep(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_pipe_port_write_after_dispose() {
    let port = pipe_port(&ScriptedAdapter::non_critical());
    port.enable_now().await;
    port.dispose_async().await;
    assert!(matches!(port.write(b"x").await, Err(PortError::Disposed(_))));
    assert!(port.endpoints().is_empty());
}
