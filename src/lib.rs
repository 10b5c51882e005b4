//! Telemetry uplink for environmental acquisition stations.
//!
//! Aerolink bridges a local data-acquisition daemon to a central
//! collection service: typed measurements stream in over the daemon's
//! framed protocol, get classified and batched under policy, and
//! stream out over an authenticated websocket with rate limiting and
//! supervised reconnection.
//!
//! # Features
//!
//! - **Self-describing values**: a closed [`Variant`] union with a
//!   compact binary codec that reads two wire revisions
//! - **Name interning**: stream identities shrink to 16-bit indices,
//!   independently on each protocol leg
//! - **Resilient relay**: fixed-delay reconnection, coalesced state
//!   snapshots, capped event forwarding
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use aerolink::{Aerolink, ClientEvent};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> aerolink::Result<()> {
//!     let (client, mut events) = Aerolink::connect("tcp://127.0.0.1:9007").await?;
//!
//!     while let Some(event) = events.next().await {
//!         if let ClientEvent::Value { name, value } = event {
//!             println!("{name} = {value:?}");
//!         }
//!     }
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod config;
mod error;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Wire format
pub mod codec;
pub mod intern;

// Protocol legs
pub mod client;
pub mod relay;
pub mod stream;

// Core exports
pub use config::{CollectorConfig, DaemonConfig, RelayConfig};
pub use error::{LinkError, Result};
pub use types::{Metadata, MetadataKind, StreamName, Variant};

// Protocol exports
pub use client::{AcquisitionClient, ClientEvent, ClientOptions, DaemonAddr, EventStream};
pub use intern::NameTable;
pub use relay::{Authenticator, NoAuth, PresharedKey, UplinkRelay};

/// Unified entry point for daemon connections and relays.
///
/// # Examples
///
/// ## Direct daemon connection
/// ```rust,no_run
/// use aerolink::Aerolink;
///
/// #[tokio::main]
/// async fn main() -> aerolink::Result<()> {
///     let (client, events) = Aerolink::connect("tcp://127.0.0.1:9007").await?;
///     // Consume events...
///     # drop(events);
///     client.shutdown().await;
///     Ok(())
/// }
/// ```
///
/// ## Supervised relay
/// ```rust,no_run
/// use aerolink::{Aerolink, RelayConfig};
///
/// #[tokio::main]
/// async fn main() -> aerolink::Result<()> {
///     let config = RelayConfig::from_yaml_file("/etc/aerolink/relay.yaml")?;
///     let relay = Aerolink::relay(config)?;
///     tokio::signal::ctrl_c().await.ok();
///     relay.shutdown().await;
///     Ok(())
/// }
/// ```
pub struct Aerolink;

impl Aerolink {
    /// Connect to an acquisition daemon with default options.
    ///
    /// Accepts `tcp://host:port`, `unix:///path`, or a bare
    /// `host:port`. Returns the command handle and the stream of
    /// decoded daemon traffic.
    ///
    /// # Errors
    ///
    /// Returns an error if the address does not parse, the daemon is
    /// unreachable, or the opening exchange fails.
    pub async fn connect(addr: &str) -> Result<(AcquisitionClient, EventStream)> {
        let addr: DaemonAddr = addr.parse()?;
        AcquisitionClient::connect(&addr, ClientOptions::default()).await
    }

    /// Start a supervised relay from the daemon to a collector.
    ///
    /// Credentials come from the configured key file, or the relay
    /// connects anonymously when none is configured. The relay runs
    /// until [`UplinkRelay::shutdown`], retrying failed sessions
    /// forever.
    ///
    /// # Errors
    ///
    /// Returns an error only for configuration problems: an invalid
    /// URL or daemon address, or unreadable key material.
    pub fn relay(config: RelayConfig) -> Result<UplinkRelay> {
        let authenticator: std::sync::Arc<dyn Authenticator> = match &config.collector.key_file {
            Some(path) => std::sync::Arc::new(PresharedKey::from_file(path)?),
            None => std::sync::Arc::new(NoAuth),
        };
        UplinkRelay::spawn(config, authenticator)
    }
}
