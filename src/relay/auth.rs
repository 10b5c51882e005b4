//! Collector credential sources.

use std::path::Path;

use async_trait::async_trait;

use crate::error::{LinkError, Result};

/// Supplies the credential bytes that open every collector session.
///
/// Called once per connection attempt, so implementations backed by
/// rotating secrets can hand out fresh material on each reconnect.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// The raw credential bytes for the next session.
    async fn credentials(&self) -> Result<Vec<u8>>;
}

/// Authenticator for collectors that accept anonymous relays.
#[derive(Debug, Default)]
pub struct NoAuth;

#[async_trait]
impl Authenticator for NoAuth {
    async fn credentials(&self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

/// Fixed key material, typically loaded from a file at startup.
pub struct PresharedKey {
    key: Vec<u8>,
}

impl PresharedKey {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    /// Reads key material from `path`. An empty file is a
    /// configuration error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let key = std::fs::read(path).map_err(|e| {
            LinkError::config_error_with_source(
                format!("reading key file {}", path.display()),
                Box::new(e),
            )
        })?;
        if key.is_empty() {
            return Err(LinkError::config_error(format!(
                "key file {} is empty",
                path.display()
            )));
        }
        Ok(Self { key })
    }
}

#[async_trait]
impl Authenticator for PresharedKey {
    async fn credentials(&self) -> Result<Vec<u8>> {
        Ok(self.key.clone())
    }
}

// Keep key material out of logs.
impl std::fmt::Debug for PresharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresharedKey").field("key", &format!("<{} bytes>", self.key.len())).finish()
    }
}
