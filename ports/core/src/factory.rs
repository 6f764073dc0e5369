//! Port Factory
//!
//! Maps a connection string to a port:
//!
//! | Scheme | Adapter |
//! |---|---|
//! | `tcp_c` | [`TcpClientAdapter`](crate::transport::TcpClientAdapter) |
//! | `tcp_s` | [`TcpServerAdapter`](crate::transport::TcpServerAdapter) |
//! | `serial` | [`SerialAdapter`](crate::transport::SerialAdapter) |
//!
//! Anything else is `PortError::UnsupportedScheme`.

use std::sync::Arc;

use crate::codec::{ParserFactory, RouteFilter};
use crate::config::{PortConfig, PortDefaults};
use crate::error::PortError;
use crate::port::{PipeChannels, PipePort, Port, ProtocolChannels, ProtocolPort};
use crate::runtime::ProtocolCore;
use crate::transport::adapter_for;

/// Create a protocol port from a connection string
///
/// # Errors
///
/// `PortError::Config` for invalid parameters and
/// `PortError::UnsupportedScheme` for unknown schemes.
pub fn create(
    connection_string: &str,
    core: &ProtocolCore,
    filters: Vec<Arc<dyn RouteFilter>>,
    parser_factory: Arc<dyn ParserFactory>,
) -> Result<ProtocolPort, PortError> {
    let config = PortConfig::parse(connection_string)?;
    Ok(create_from_config(config, core, filters, parser_factory))
}

/// Create a protocol port from an already validated config
#[must_use]
pub fn create_from_config(
    config: PortConfig,
    core: &ProtocolCore,
    filters: Vec<Arc<dyn RouteFilter>>,
    parser_factory: Arc<dyn ParserFactory>,
) -> ProtocolPort {
    let adapter = adapter_for(&config);
    let channels = ProtocolChannels::new(
        &config.id(),
        core.handle().clone(),
        core.port_statistics(),
        filters,
        parser_factory,
    );
    Port::new(config, adapter, channels, core.clone())
}

/// Create a pipe port from a connection string
///
/// # Errors
///
/// See [`create`].
pub fn create_pipe(connection_string: &str, core: &ProtocolCore) -> Result<PipePort, PortError> {
    create_pipe_with(connection_string, core, &PortDefaults::default())
}

/// Create a pipe port, filling missing parameters from `defaults`
///
/// # Errors
///
/// See [`create`].
pub fn create_pipe_with(
    connection_string: &str,
    core: &ProtocolCore,
    defaults: &PortDefaults,
) -> Result<PipePort, PortError> {
    let config = PortConfig::parse_with(connection_string, defaults)?;
    let adapter = adapter_for(&config);
    let channels = PipeChannels::new(&config.id(), core.handle().clone(), core.port_statistics());
    Ok(Port::new(config, adapter, channels, core.clone()))
}
