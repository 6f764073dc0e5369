//! Ports Core - Reconnecting Transport Lifecycle
//!
//! Long-lived, self-healing communication ports for a message-oriented
//! protocol stack. Every transport (TCP client, TCP server, serial) gets the
//! same lifecycle: enable/disable, observable status and error, automatic
//! reconnect, and idempotent teardown.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            Port<C>                                │
//! │  Status / Error / IsEnabled   busy guard   session token          │
//! │  reconnect timer              sweep timer                         │
//! │        │                                          ▲               │
//! │        │ open(session) / close()                  │ attach(link)  │
//! │        ▼                                          │ publish_error │
//! │  ┌───────────────────────┐            ┌───────────┴────────────┐  │
//! │  │   TransportAdapter    │──RawLink──▶│       Channels (C)     │  │
//! │  │ tcp_c / tcp_s / serial│            │ EndpointRegistry (pipe)│  │
//! │  └───────────────────────┘            │ ConnectionRegistry     │  │
//! │                                       │   (protocol)           │  │
//! │                                       └────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Port`]: the state machine, as [`ProtocolPort`] or [`PipePort`]
//! - [`ProtocolCore`]: runtime handle and aggregate statistics
//! - [`EndpointRegistry`]: lock-free copy-on-write endpoint set
//! - [`ConnectionRegistry`]: lock-guarded connection list with auto-removal
//! - [`TransportAdapter`]: connect/accept/open primitives
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ports_core::{create, FrameParser, MessageParser, ProtocolCore};
//! use tokio_util::sync::CancellationToken;
//!
//! let core = ProtocolCore::current();
//! let parsers = Arc::new(|| -> Vec<Box<dyn MessageParser>> { vec![Box::new(FrameParser::new())] });
//! let port = create("tcp_c://127.0.0.1:7341", &core, Vec::new(), parsers)?;
//! port.enable();
//! port.wait_connected(Duration::from_secs(5), &CancellationToken::new()).await?;
//! let mut rx = port.on_rx();
//! ```
//!
//! # Module Overview
//!
//! - [`config`]: connection strings, `PortConfig`, TOML port files
//! - [`port`]: the lifecycle state machine
//! - [`registry`]: endpoint and connection registries
//! - [`channel`]: live endpoints and connections over raw links
//! - [`transport`]: TCP client/server and serial adapters
//! - [`codec`]: parser/filter seam and the default frame codec
//! - [`factory`]: connection string to port

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channel;
pub mod codec;
pub mod config;
pub mod dispose;
pub mod error;
pub mod factory;
pub mod port;
pub mod property;
pub mod registry;
pub mod runtime;
pub mod stats;
pub mod timer;
pub mod transport;

pub use channel::{Connection, Endpoint, RawLink, StreamConnection, StreamEndpoint};
pub use codec::{
    FrameMessage, FrameParser, MessageParser, MessageRef, ParserFactory, ProtocolMessage,
    RouteFilter,
};
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, PortConfig,
    PortDefaults, PortEntry, PortsToml, TransportKind,
};
pub use dispose::DisposeFlag;
pub use error::{CodecError, PortError, TransportError};
pub use factory::{create, create_from_config, create_pipe, create_pipe_with};
pub use port::{Channels, PipePort, Port, PortStatus, ProtocolPort, Session};
pub use property::{Property, PropertyStream};
pub use registry::{ConnectionRegistry, EndpointRegistry, RegistryEvent};
pub use runtime::ProtocolCore;
pub use stats::{PortStatistics, StatisticsSnapshot};
pub use timer::OwnedTimer;
pub use transport::TransportAdapter;
