//! TOML Configuration File Support
//!
//! Describes a set of ports for a long-running host. Loaded from
//! `$XDG_CONFIG_HOME/ports/ports.toml` unless a path is given.
//!
//! # Configuration Priority
//!
//! 1. Query parameters on each connection string
//! 2. Environment variables (`PORTS_RECONNECT_MS`, `PORTS_CONNECT_TIMEOUT_MS`)
//! 3. `[defaults]` table of the file
//! 4. Built-in defaults
//!
//! # Example Configuration
//!
//! ```toml
//! [defaults]
//! reconnect_ms = 2000
//!
//! [[port]]
//! connection = "tcp_s://0.0.0.0:7341"
//! tags = ["gcs"]
//!
//! [[port]]
//! connection = "serial:/dev/ttyUSB0?br=57600"
//! enabled = false
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{PortConfig, PortDefaults};
use crate::error::PortError;

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// A port entry does not describe a valid port
    #[error("Invalid port `{connection}`: {source}")]
    InvalidPort {
        /// The offending connection string
        connection: String,
        /// Why it was rejected
        source: PortError,
    },
}

/// One `[[port]]` table
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortEntry {
    /// Connection string selecting the transport
    pub connection: String,
    /// Labels attached to the port
    #[serde(default)]
    pub tags: Vec<String>,
    /// Whether the host should enable the port on start
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Whole configuration file
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsToml {
    /// Fallback timeouts
    pub defaults: PortDefaults,
    /// Ports to host
    #[serde(rename = "port")]
    pub ports: Vec<PortEntry>,
}

impl PortsToml {
    /// Parse and validate every port entry
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidPort` for the first entry that fails.
    pub fn port_configs(&self) -> Result<Vec<(PortEntry, PortConfig)>, ConfigError> {
        self.ports
            .iter()
            .map(|entry| {
                PortConfig::parse_with(&entry.connection, &self.defaults)
                    .map(|config| (entry.clone(), config))
                    .map_err(|source| ConfigError::InvalidPort {
                        connection: entry.connection.clone(),
                        source,
                    })
            })
            .collect()
    }
}

/// Get the default config file path
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("ports").join("ports.toml"))
}

/// Load configuration from the default path
///
/// # Errors
///
/// See [`load_config_from_path`].
pub fn load_config() -> Result<PortsToml, ConfigError> {
    load_config_from_path(default_config_path().as_deref())
}

/// Load configuration from `path`, falling back to defaults when absent
///
/// # Errors
///
/// Returns `ConfigError::ReadError` when the file exists but cannot be
/// read, `ConfigError::ParseError` for malformed TOML and
/// `ConfigError::InvalidPort` when an entry fails validation.
pub fn load_config_from_path(path: Option<&Path>) -> Result<PortsToml, ConfigError> {
    let mut config = PortsToml::default();

    if let Some(config_path) = path {
        if config_path.exists() {
            let content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.to_path_buf(),
                    source: e,
                })?;
            config = toml::from_str(&content)?;

            tracing::info!(
                path = %config_path.display(),
                ports = config.ports.len(),
                "Loaded port configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config.defaults);

    // Reject bad entries at load time, not at first enable
    config.port_configs()?;

    Ok(config)
}

fn apply_env_config(defaults: &mut PortDefaults) {
    if let Some(ms) = env_u64("PORTS_RECONNECT_MS") {
        defaults.reconnect_ms = ms;
    }
    if let Some(ms) = env_u64("PORTS_CONNECT_TIMEOUT_MS") {
        defaults.connect_timeout_ms = ms;
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_valid_toml() {
        let file = write_config(
            r#"
[defaults]
connect_timeout_ms = 1500

[[port]]
connection = "tcp_s://0.0.0.0:7341"
tags = ["gcs", "uplink"]

[[port]]
connection = "serial:/dev/ttyUSB0?br=57600"
enabled = false
"#,
        );

        let config = load_config_from_path(Some(file.path())).unwrap();
        assert_eq!(config.ports.len(), 2);
        assert_eq!(config.ports[0].tags, vec!["gcs", "uplink"]);
        assert!(config.ports[0].enabled);
        assert!(!config.ports[1].enabled);

        let parsed = config.port_configs().unwrap();
        assert_eq!(parsed[0].1.connect_timeout, Duration::from_millis(1500));
        assert_eq!(parsed[1].1.transport.scheme(), "serial");
    }

    #[test]
    fn test_missing_file_graceful() {
        let config =
            load_config_from_path(Some(Path::new("/nonexistent/ports/ports.toml"))).unwrap();
        assert!(config.ports.is_empty());
    }

    #[test]
    fn test_malformed_toml_error() {
        let file = write_config("[[port]\nconnection = 1");
        let result = load_config_from_path(Some(file.path()));
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_invalid_port_rejected_at_load() {
        let file = write_config(
            r#"
[[port]]
connection = "udp://127.0.0.1:14550"
"#,
        );
        let result = load_config_from_path(Some(file.path()));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidPort {
                source: PortError::UnsupportedScheme(_),
                ..
            })
        ));
    }

    #[test]
    fn test_default_config_path() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("ports/ports.toml"));
        }
    }
}
