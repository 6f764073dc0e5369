//! Connection String Parsing
//!
//! Connection strings select a transport and carry its parameters:
//!
//! ```text
//! tcp_c://127.0.0.1:7341?reconnect=2000
//! tcp_s://0.0.0.0:7341?max_connections=8
//! serial:/dev/ttyUSB0?br=57600&parity=even
//! ```
//!
//! Only the split into scheme, target and query pairs happens here; the
//! meaning of each key is decided by [`super::PortConfig`].

use std::collections::BTreeMap;
use std::fmt;

use crate::error::PortError;

/// A connection string split into its parts
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionString {
    /// Lower-cased scheme (`tcp_c`, `tcp_s`, `serial`, ...)
    pub scheme: String,
    /// Host:port for sockets, device path for serial
    pub target: String,
    /// Query parameters, keys lower-cased
    pub query: BTreeMap<String, String>,
}

impl ConnectionString {
    /// Split `input` into scheme, target and query
    ///
    /// # Errors
    ///
    /// Returns `PortError::Config` when the scheme or target is missing or a
    /// query pair has no `=`.
    pub fn parse(input: &str) -> Result<Self, PortError> {
        let input = input.trim();
        let (scheme, rest) = match input.split_once("://") {
            Some(parts) => parts,
            None => input
                .split_once(':')
                .ok_or_else(|| PortError::Config(format!("missing scheme in `{input}`")))?,
        };

        if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(PortError::Config(format!("invalid scheme in `{input}`")));
        }

        let (target, query_str) = match rest.split_once('?') {
            Some((target, query)) => (target, Some(query)),
            None => (rest, None),
        };

        if target.is_empty() {
            return Err(PortError::Config(format!("missing target in `{input}`")));
        }

        let mut query = BTreeMap::new();
        for pair in query_str.into_iter().flat_map(|q| q.split('&')) {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                PortError::Config(format!("query parameter `{pair}` has no value"))
            })?;
            query.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            target: target.to_string(),
            query,
        })
    }

    /// Remove and parse a numeric query parameter
    ///
    /// # Errors
    ///
    /// Returns `PortError::Config` if the value is not a valid number.
    pub fn take_number<T: std::str::FromStr>(&mut self, key: &str) -> Result<Option<T>, PortError> {
        match self.query.remove(key) {
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| PortError::Config(format!("`{key}` must be a number, got `{raw}`"))),
            None => Ok(None),
        }
    }

    /// Remove a raw query parameter
    pub fn take(&mut self, key: &str) -> Option<String> {
        self.query.remove(key)
    }

    /// Fail on any query parameter nobody consumed
    ///
    /// # Errors
    ///
    /// Returns `PortError::Config` naming the first unknown key.
    pub fn ensure_consumed(&self) -> Result<(), PortError> {
        match self.query.keys().next() {
            Some(key) => Err(PortError::Config(format!(
                "unknown parameter `{key}` for scheme `{}`",
                self.scheme
            ))),
            None => Ok(()),
        }
    }
}

impl fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.target)?;
        let mut sep = '?';
        for (key, value) in &self.query {
            write!(f, "{sep}{key}={value}")?;
            sep = '&';
        }
        Ok(())
    }
}
