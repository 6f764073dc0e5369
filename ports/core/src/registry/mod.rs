//! Registries of live channels
//!
//! Each port uses exactly one flavor:
//! - [`EndpointRegistry`]: lock-free copy-on-write array for pipe ports,
//!   reclaimed by a periodic sweep
//! - [`ConnectionRegistry`]: lock-guarded list for protocol ports, with
//!   per-connection watchers that remove closed connections

pub mod connection;
pub mod endpoint;

pub use connection::{ConnectionRef, ConnectionRegistry, RegistryEvent};
pub use endpoint::{EndpointRef, EndpointRegistry, RegistryState};
