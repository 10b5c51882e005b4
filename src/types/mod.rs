//! Core types for telemetry data representation.
//!
//! This module provides the two foundational data structures shared by
//! every protocol leg in the crate:
//!
//! - [`StreamName`] identifies one measurement stream by station, archive,
//!   variable, and flavor set, with lowercase canonicalization and
//!   order-insensitive flavor comparison
//! - [`Variant`] is the closed set of value shapes the acquisition system
//!   produces, from scalars up to nested containers and typed [`Metadata`]
//!
//! Both types know their own wire form: names serialize through
//! [`StreamName::encode_into`], values through the [`crate::codec`] module.
//!
//! ## Usage Example
//!
//! ```rust
//! use aerolink::types::{Metadata, MetadataKind, StreamName, Variant};
//!
//! // The scattering coefficient stream from the local station in the
//! // raw archive, qualified by its measurement wavelength.
//! let name = StreamName::new("nil", "raw", "BsG_S11", ["pm10"]);
//! assert_eq!(name.meta_name().archive(), "raw_meta");
//!
//! let value = Variant::Real(12.25);
//! assert_eq!(value.as_real(), Some(12.25));
//!
//! // Metadata describing that stream.
//! let mut meta = Metadata::new(MetadataKind::Real);
//! meta.entries.insert("Units".to_string(), Variant::Text("Mm-1".to_string()));
//! let described = Variant::Metadata(meta);
//! assert_eq!(described.get("Units").and_then(Variant::as_text), Some("Mm-1"));
//! ```

mod name;
mod variant;

// Re-export all public types
pub use name::StreamName;
pub use variant::{Metadata, MetadataKind, Variant};
