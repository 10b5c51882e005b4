//! Error types for telemetry links.
//!
//! All fallible operations in this crate return [`LinkError`]. The type
//! separates transport failures, which a fresh connection attempt can fix,
//! from protocol, encoding, and configuration failures, which cannot be
//! retried away.
//!
//! ## Retry Classification
//!
//! ```rust
//! use aerolink::LinkError;
//!
//! let error = LinkError::connection_failed("collector unreachable");
//! if error.is_transient() {
//!     println!("worth another attempt");
//! }
//! ```
//!
//! ## Helper Constructors
//!
//! Use helper methods for common error scenarios:
//!
//! ```rust
//! use aerolink::LinkError;
//! use std::time::Duration;
//!
//! let timeout = LinkError::timeout("daemon HELLO", Duration::from_secs(10));
//! let protocol = LinkError::protocol_violation("daemon packet", "unknown packet type 0x63");
//! ```

use std::time::Duration;

use thiserror::Error;

/// Result type alias for telemetry link operations.
pub type Result<T, E = LinkError> = std::result::Result<T, E>;

/// Main error type for telemetry link operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LinkError {
    #[error("Connection failed: {reason}")]
    Connection {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("I/O error during {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Protocol violation in {context}: {details}")]
    Protocol { context: String, details: String },

    #[error("Encoding error in {context}: {details}")]
    Encoding { context: String, details: String },

    #[error("Value references unannounced name index {index}")]
    UnknownIndex { index: u16 },

    #[error("{operation} timed out after {duration:?}")]
    Timeout { operation: String, duration: Duration },

    #[error("Handshake failed: {details}")]
    Handshake { details: String },

    #[error("Configuration error: {reason}")]
    Config {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl LinkError {
    /// Returns whether a fresh connection attempt could clear this error.
    ///
    /// Transport-level failures come and go with network conditions.
    /// Protocol, encoding, and configuration errors stay wrong no matter
    /// how often they are retried.
    pub fn is_transient(&self) -> bool {
        match self {
            LinkError::Connection { .. } => true,
            LinkError::Io { .. } => true,
            LinkError::Timeout { .. } => true,
            LinkError::Protocol { .. } => false,
            LinkError::Encoding { .. } => false,
            LinkError::UnknownIndex { .. } => false,
            LinkError::Handshake { .. } => false,
            LinkError::Config { .. } => false,
        }
    }

    /// Helper constructor for connection errors.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        LinkError::Connection { reason: reason.into(), source: None }
    }

    /// Helper constructor for connection errors with source.
    pub fn connection_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        LinkError::Connection { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for I/O errors with operation context.
    pub fn io_error(context: impl Into<String>, source: std::io::Error) -> Self {
        LinkError::Io { context: context.into(), source }
    }

    /// Helper constructor for protocol violations.
    pub fn protocol_violation(context: impl Into<String>, details: impl Into<String>) -> Self {
        LinkError::Protocol { context: context.into(), details: details.into() }
    }

    /// Helper constructor for encoding errors.
    pub fn encoding_error(context: impl Into<String>, details: impl Into<String>) -> Self {
        LinkError::Encoding { context: context.into(), details: details.into() }
    }

    /// Helper constructor for timeouts.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        LinkError::Timeout { operation: operation.into(), duration }
    }

    /// Helper constructor for handshake failures.
    pub fn handshake(details: impl Into<String>) -> Self {
        LinkError::Handshake { details: details.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config_error(reason: impl Into<String>) -> Self {
        LinkError::Config { reason: reason.into(), source: None }
    }

    /// Helper constructor for configuration errors with source.
    pub fn config_error_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        LinkError::Config { reason: reason.into(), source: Some(source) }
    }
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        LinkError::Io { context: "transport".to_string(), source: err }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for LinkError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        LinkError::Connection {
            reason: "collector websocket".to_string(),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(test)]
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn error_messages_contain_their_context(
                context in "[a-z ]{1,24}",
                details in "[a-z0-9 ]{1,24}",
                index in any::<u16>()
            ) {
                let protocol = LinkError::protocol_violation(context.clone(), details.clone());
                let message = protocol.to_string();
                prop_assert!(message.contains(&context));
                prop_assert!(message.contains(&details));

                let encoding = LinkError::encoding_error(context.clone(), details.clone());
                prop_assert!(encoding.to_string().contains(&details));

                let unknown = LinkError::UnknownIndex { index };
                prop_assert!(unknown.to_string().contains(&index.to_string()));
            }

            #[test]
            fn source_chains_survive_wrapping(
                base_message in "[a-z ]{1,24}",
                reason in "[a-z ]{1,24}"
            ) {
                let base: Box<dyn std::error::Error + Send + Sync> =
                    Box::new(std::io::Error::other(base_message.clone()));
                let wrapped = LinkError::connection_failed_with_source(reason, base);

                let mut found = false;
                let mut current = std::error::Error::source(&wrapped);
                while let Some(source) = current {
                    if source.to_string().contains(&base_message) {
                        found = true;
                    }
                    current = std::error::Error::source(source);
                }
                prop_assert!(found, "base message '{}' lost from chain", base_message);
            }
        }
    }

    #[test]
    fn transient_classification() {
        assert!(LinkError::connection_failed("dial refused").is_transient());
        assert!(LinkError::io_error("read", std::io::Error::other("gone")).is_transient());
        assert!(LinkError::timeout("dial", Duration::from_secs(1)).is_transient());

        assert!(!LinkError::protocol_violation("packet", "bad opcode").is_transient());
        assert!(!LinkError::encoding_error("variant", "bad tag").is_transient());
        assert!(!LinkError::handshake("wrong reply byte").is_transient());
        assert!(!LinkError::config_error("bad url").is_transient());
        assert!(!LinkError::UnknownIndex { index: 7 }.is_transient());
    }

    #[test]
    fn io_conversion_keeps_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer reset");
        let converted: LinkError = io_err.into();

        match converted {
            LinkError::Io { ref source, .. } => assert_eq!(source.to_string(), "peer reset"),
            _ => panic!("expected Io variant from io::Error conversion"),
        }
        assert!(std::error::Error::source(&converted).is_some());
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<LinkError>();

        let error = LinkError::connection_failed("test");
        let _: &dyn std::error::Error = &error;
    }
}
