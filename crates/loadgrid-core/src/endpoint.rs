//! Endpoint — the identity of one worker fleet member.
//!
//! Equality is structural on (host, port), which makes `Endpoint` usable
//! as a map key for the fleet view and the worker registry.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error parsing an `Endpoint` from a `host:port` string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointParseError {
    #[error("endpoint address must be host:port, got: {0}")]
    MissingPort(String),

    #[error("invalid endpoint port: {0}")]
    InvalidPort(String),
}

/// Host + port identifying one worker endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Base URL for HTTP calls against this endpoint.
    pub fn http_base(&self) -> String {
        format!("http://{self}")
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| EndpointParseError::MissingPort(s.to_string()))?;
        if host.is_empty() {
            return Err(EndpointParseError::MissingPort(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| EndpointParseError::InvalidPort(port.to_string()))?;
        Ok(Endpoint::new(host, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_address() {
        let ep: Endpoint = "10.0.0.1:8000".parse().unwrap();
        assert_eq!(ep.host, "10.0.0.1");
        assert_eq!(ep.port, 8000);
    }

    #[test]
    fn parse_rejects_missing_port() {
        let err = "10.0.0.1".parse::<Endpoint>().unwrap_err();
        assert!(matches!(err, EndpointParseError::MissingPort(_)));
    }

    #[test]
    fn parse_rejects_bad_port() {
        let err = "10.0.0.1:99999".parse::<Endpoint>().unwrap_err();
        assert!(matches!(err, EndpointParseError::InvalidPort(_)));
    }

    #[test]
    fn structural_equality_and_hashing() {
        use std::collections::HashMap;

        let a = Endpoint::new("10.0.0.1", 8000);
        let b = Endpoint::new("10.0.0.1", 8000);
        assert_eq!(a, b);

        let mut map = HashMap::new();
        map.insert(a, "node-1");
        assert_eq!(map.get(&b), Some(&"node-1"));
    }

    #[test]
    fn display_round_trips() {
        let ep = Endpoint::new("worker-0", 9090);
        assert_eq!(ep.to_string(), "worker-0:9090");
        assert_eq!(ep.to_string().parse::<Endpoint>().unwrap(), ep);
        assert_eq!(ep.http_base(), "http://worker-0:9090");
    }
}
