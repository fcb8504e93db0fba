//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimSyncError};
use crate::protocol::{DEFAULT_HOST, DEFAULT_SERVER_ADDR};

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Well-known rendezvous address of the server
    pub server_addr: String,

    /// Host used when connecting without an explicit one
    pub host: String,

    /// Pause before a rendezvous that follows a failed receive phase
    pub reconnect_delay_ms: u64,

    /// How long `disconnect` waits for a busy background unit
    pub shutdown_grace_ms: u64,

    /// Metadata diagnostics are cut to this many characters
    pub meta_data_log_width: usize,

    /// TCP transport settings
    pub tcp: TcpConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: DEFAULT_SERVER_ADDR.to_string(),
            host: DEFAULT_HOST.to_string(),
            reconnect_delay_ms: 1000,
            shutdown_grace_ms: 2000,
            meta_data_log_width: 200,
            tcp: TcpConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| SimSyncError::Config(format!("Failed to read config file: {e}")))?;

        Ok(toml::from_str(&content)?)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `SIMSYNC_*` environment variables on top of `self`
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(addr) = std::env::var("SIMSYNC_SERVER_ADDR") {
            self.server_addr = addr;
        }
        if let Ok(host) = std::env::var("SIMSYNC_HOST") {
            self.host = host;
        }
        if let Ok(val) = std::env::var("SIMSYNC_RECONNECT_DELAY_MS") {
            if let Ok(val) = val.parse() {
                self.reconnect_delay_ms = val;
            }
        }
        if let Ok(val) = std::env::var("SIMSYNC_SHUTDOWN_GRACE_MS") {
            if let Ok(val) = val.parse() {
                self.shutdown_grace_ms = val;
            }
        }

        self
    }

    /// Default config file location (`<config dir>/simsync/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("simsync").join("config.toml"))
    }

    /// Default file if present, then environment overrides
    pub fn load() -> Result<Self> {
        let base = match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(path)?,
            _ => Self::default(),
        };
        Ok(base.with_env_overrides())
    }

    /// Reconnect delay as a duration
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Shutdown grace period as a duration
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// TCP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// Interval between connection attempts to a peer that is not up yet
    pub connect_retry_ms: u64,

    /// Largest accepted frame in bytes
    pub max_frame_len: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            connect_retry_ms: 50,
            max_frame_len: 64 * 1024 * 1024, // 64 MiB
        }
    }
}

impl TcpConfig {
    /// Connect retry interval as a duration
    pub fn connect_retry(&self) -> Duration {
        Duration::from_millis(self.connect_retry_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.server_addr, "tcp://127.0.0.1:7000");
        assert_eq!(config.host, "tcp://127.0.0.1");
        assert_eq!(config.reconnect_delay(), Duration::from_secs(1));
        assert_eq!(config.meta_data_log_width, 200);
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            server_addr = "tcp://10.0.0.2:7000"
            reconnect_delay_ms = 250

            [tcp]
            connect_retry_ms = 10
        "#;

        let config: ClientConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server_addr, "tcp://10.0.0.2:7000");
        assert_eq!(config.reconnect_delay_ms, 250);
        assert_eq!(config.tcp.connect_retry_ms, 10);
        // Unset keys keep their defaults
        assert_eq!(config.host, "tcp://127.0.0.1");
        assert_eq!(config.tcp.max_frame_len, 64 * 1024 * 1024);
    }

    #[test]
    fn test_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "shutdown_grace_ms = 5\nmeta_data_log_width = 80\n").unwrap();

        let config = ClientConfig::from_file(&path).unwrap();
        assert_eq!(config.shutdown_grace(), Duration::from_millis(5));
        assert_eq!(config.meta_data_log_width, 80);
    }

    #[test]
    fn test_config_from_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "reconnect_delay_ms = \"soon\"").unwrap();

        assert!(matches!(
            ClientConfig::from_file(&path),
            Err(SimSyncError::Config(_))
        ));
        assert!(ClientConfig::from_file(dir.path().join("missing.toml")).is_err());
    }
}
