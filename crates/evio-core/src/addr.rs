//! Endpoint address parsing
//!
//! One string syntax covers both socket families:
//!
//! - `host:port` - TCP endpoint; empty host means every interface
//! - `bind@host:port` - TCP endpoint with an explicit local bind
//!   address for the outbound side (multi-homed hosts)
//! - `/path/to/sock` or `./rel.sock` - unix-domain endpoint; anything
//!   starting with `/` or `.` is a filesystem path
//!
//! Parsing is pure syntax. Whether `host` is numeric or resolvable is
//! the platform layer's business.

use core::fmt;
use std::str::FromStr;

/// A parsed listen or connect address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// TCP endpoint, optionally pinned to a local bind address
    Inet {
        bind: Option<String>,
        host: String,
        port: u16,
    },

    /// Unix-domain socket path
    Local(String),
}

impl Endpoint {
    /// TCP endpoint without a local bind address
    pub fn inet(host: impl Into<String>, port: u16) -> Self {
        Endpoint::Inet {
            bind: None,
            host: host.into(),
            port,
        }
    }

    /// Unix-domain endpoint
    pub fn local(path: impl Into<String>) -> Self {
        Endpoint::Local(path.into())
    }

    #[inline]
    pub fn is_local(&self) -> bool {
        matches!(self, Endpoint::Local(_))
    }

    pub fn port(&self) -> Option<u16> {
        match self {
            Endpoint::Inet { port, .. } => Some(*port),
            Endpoint::Local(_) => None,
        }
    }

    pub fn host(&self) -> Option<&str> {
        match self {
            Endpoint::Inet { host, .. } => Some(host),
            Endpoint::Local(_) => None,
        }
    }

    /// Local bind address of the `bind@host:port` form
    pub fn bind_host(&self) -> Option<&str> {
        match self {
            Endpoint::Inet { bind, .. } => bind.as_deref(),
            Endpoint::Local(_) => None,
        }
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            Endpoint::Local(p) => Some(p),
            Endpoint::Inet { .. } => None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Inet { bind: Some(b), host, port } => write!(f, "{}@{}:{}", b, host, port),
            Endpoint::Inet { bind: None, host, port } => write!(f, "{}:{}", host, port),
            Endpoint::Local(path) => write!(f, "{}", path),
        }
    }
}

/// Endpoint string rejected by the parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEndpointError {
    pub input: String,
    pub reason: &'static str,
}

impl ParseEndpointError {
    fn new(input: &str, reason: &'static str) -> Self {
        ParseEndpointError {
            input: input.to_string(),
            reason,
        }
    }
}

impl fmt::Display for ParseEndpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid endpoint '{}': {}", self.input, self.reason)
    }
}

impl std::error::Error for ParseEndpointError {}

impl FromStr for Endpoint {
    type Err = ParseEndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseEndpointError::new(s, "empty address"));
        }

        // Filesystem paths name unix-domain endpoints
        if s.starts_with('/') || s.starts_with('.') {
            return Ok(Endpoint::Local(s.to_string()));
        }

        let (bind, rest) = match s.split_once('@') {
            Some((b, rest)) => {
                if b.is_empty() {
                    return Err(ParseEndpointError::new(s, "empty bind address before '@'"));
                }
                (Some(b.to_string()), rest)
            }
            None => (None, s),
        };

        let (host, port_str) = rest
            .rsplit_once(':')
            .ok_or_else(|| ParseEndpointError::new(s, "missing ':port'"))?;
        let port: u16 = port_str
            .parse()
            .map_err(|_| ParseEndpointError::new(s, "port is not a number in 0..=65535"))?;

        // Empty host listens on / connects via every interface
        let host = if host.is_empty() { "0.0.0.0" } else { host };

        Ok(Endpoint::Inet {
            bind,
            host: host.to_string(),
            port,
        })
    }
}
