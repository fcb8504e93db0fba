//! Session endpoint addressing.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimSyncError};

/// `{host, port}` pair identifying this client.
///
/// The derived address doubles as the client's rendezvous identity and as the
/// per-session address the server binds for metadata and data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionEndpoint {
    /// Host part including scheme, e.g. `tcp://127.0.0.1`
    pub host: String,
    /// Port part, kept as text the way the server echoes it
    pub port: String,
}

impl SessionEndpoint {
    /// Create an endpoint, rejecting an empty port.
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Result<Self> {
        let host = host.into();
        let port = port.into();

        if port.trim().is_empty() {
            return Err(SimSyncError::Config(
                "Must specify client port".to_string(),
            ));
        }
        if host.trim().is_empty() {
            return Err(SimSyncError::Config(format!(
                "Must specify client host for port {port}"
            )));
        }

        Ok(Self { host, port })
    }

    /// Canonical `host:port` address string.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for SessionEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_address() {
        let endpoint = SessionEndpoint::new("tcp://127.0.0.1", "7000").unwrap();
        assert_eq!(endpoint.address(), "tcp://127.0.0.1:7000");
        assert_eq!(endpoint.to_string(), endpoint.address());
    }

    #[test]
    fn test_endpoint_requires_port() {
        let err = SessionEndpoint::new("tcp://127.0.0.1", "").unwrap_err();
        assert!(matches!(err, SimSyncError::Config(_)));
        assert!(SessionEndpoint::new("", "1234").is_err());
    }
}
