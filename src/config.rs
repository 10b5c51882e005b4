//! Relay configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::client::DaemonAddr;
use crate::error::{LinkError, Result};

/// Everything a relay needs to run, typically loaded from YAML:
///
/// ```yaml
/// collector:
///   url: wss://collector.example.net/uplink
///   key_file: /etc/aerolink/uplink.key
/// daemon:
///   address: tcp://127.0.0.1:9007
/// include_instant: true
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    pub collector: CollectorConfig,
    pub daemon: DaemonConfig,
    /// Forward `rt_instant` values in addition to `raw`.
    #[serde(default)]
    pub include_instant: bool,
}

/// The collector websocket endpoint and its credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    /// `ws://` or `wss://` URL of the collector.
    pub url: String,
    /// Key material presented during the handshake; anonymous when
    /// absent.
    #[serde(default)]
    pub key_file: Option<PathBuf>,
}

/// The local acquisition daemon endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// `tcp://host:port`, `unix:///path`, or a bare `host:port`.
    pub address: String,
}

impl RelayConfig {
    /// Loads and validates a configuration file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            LinkError::config_error_with_source(format!("reading {}", path.display()), Box::new(e))
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Parses and validates configuration from YAML text.
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(raw).map_err(|e| {
            LinkError::config_error_with_source("parsing relay configuration", Box::new(e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks everything that must be right before the first
    /// connection attempt.
    pub fn validate(&self) -> Result<()> {
        if !(self.collector.url.starts_with("ws://") || self.collector.url.starts_with("wss://")) {
            return Err(LinkError::config_error(format!(
                "collector url '{}' must start with ws:// or wss://",
                self.collector.url
            )));
        }
        self.daemon.address.parse::<DaemonAddr>()?;
        Ok(())
    }
}
