//! Port Host
//!
//! Owns every port described by the configuration file:
//! - Creates one protocol port per `[[port]]` entry
//! - Applies tags and enables the entries marked `enabled`
//! - Logs status and error transitions of each port
//! - Disposes everything on shutdown
//!
//! ```text
//!                  PortHost
//!                     │
//!        ┌────────────┼────────────┐
//!        │            │            │
//!     tcp_s://     tcp_c://     serial:
//!     (gcs)        (uplink)     (radio)
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use dashmap::DashMap;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ports_core::{
    create_from_config, FrameParser, MessageParser, ParserFactory, PortStatus, PortsToml,
    ProtocolCore, ProtocolPort,
};

/// Hosts the configured ports until shutdown
pub struct PortHost {
    core: ProtocolCore,
    /// Live ports keyed by port id
    ports: Arc<DashMap<String, Arc<ProtocolPort>>>,
    monitors: JoinSet<()>,
    stop: CancellationToken,
}

impl PortHost {
    /// Create an empty host on the current runtime
    pub fn new() -> Self {
        Self {
            core: ProtocolCore::current(),
            ports: Arc::new(DashMap::new()),
            monitors: JoinSet::new(),
            stop: CancellationToken::new(),
        }
    }

    /// Create, tag and enable every port in `config`
    pub fn start(&mut self, config: &PortsToml) -> Result<()> {
        let entries = config
            .port_configs()
            .context("Invalid port configuration")?;
        let parsers: Arc<dyn ParserFactory> =
            Arc::new(|| -> Vec<Box<dyn MessageParser>> { vec![Box::new(FrameParser::new())] });

        for (entry, port_config) in entries {
            let port = Arc::new(create_from_config(
                port_config,
                &self.core,
                Vec::new(),
                Arc::clone(&parsers),
            ));
            for tag in &entry.tags {
                port.add_tag(tag.clone());
            }

            let id = port.id().to_string();
            if self.ports.contains_key(&id) {
                warn!(port = %id, "Duplicate port entry ignored");
                port.dispose();
                continue;
            }

            self.monitors
                .spawn(monitor(Arc::clone(&port), self.stop.child_token()));
            if entry.enabled {
                port.enable();
            } else {
                info!(port = %id, "Port configured but not enabled");
            }
            self.ports.insert(id, port);
        }

        info!(count = self.ports.len(), "Ports started");
        Ok(())
    }

    /// Number of hosted ports
    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    /// Aggregate traffic counters as JSON
    pub fn statistics_json(&self) -> Result<String> {
        let mut per_port = serde_json::Map::new();
        for entry in self.ports.iter() {
            per_port.insert(
                entry.key().clone(),
                serde_json::json!({
                    "status": entry.value().status(),
                    "tags": entry.value().tags(),
                    "statistics": entry.value().statistics(),
                }),
            );
        }
        let report = serde_json::json!({
            "total": self.core.statistics(),
            "ports": per_port,
        });
        serde_json::to_string_pretty(&report).context("Failed to serialize statistics")
    }

    /// Dispose every port and wait for the monitors to finish
    pub async fn shutdown(&mut self) {
        info!("Initiating graceful shutdown");
        self.stop.cancel();

        let ports: Vec<_> = self.ports.iter().map(|e| Arc::clone(e.value())).collect();
        self.ports.clear();
        for port in ports {
            debug!(port = %port.id(), "Disposing");
            port.dispose_async().await;
        }

        while let Some(joined) = self.monitors.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Port monitor ended abnormally");
            }
        }
        info!("All ports disposed");
    }
}

impl Default for PortHost {
    fn default() -> Self {
        Self::new()
    }
}

/// Log status and error transitions of one port
async fn monitor(port: Arc<ProtocolPort>, stop: CancellationToken) {
    let mut status = port.on_status();
    let mut errors = port.on_error();
    let mut rx = port.on_rx();

    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            next = status.next() => match next {
                Some(PortStatus::Connected) => {
                    info!(port = %port.id(), channels = port.channel_count(), "Port connected");
                }
                Some(s) => debug!(port = %port.id(), status = %s, "Status changed"),
                None => break,
            },
            next = errors.next() => match next {
                Some(Some(e)) => warn!(port = %port.id(), error = %e, "Port error"),
                Some(None) => {}
                None => break,
            },
            message = rx.recv() => match message {
                Ok(m) => debug!(
                    port = %port.id(),
                    protocol = m.protocol(),
                    name = m.name(),
                    "Message received"
                ),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(port = %port.id(), skipped, "Monitor lagged behind inbound traffic");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}
