//! Self-describing binary codec for [`Variant`] values.
//!
//! Every value serializes as a one-byte tag followed by a tag-specific
//! payload. Two revisions of the format coexist:
//!
//! - **Revision 1** spelled every length as 4 little-endian bytes. It is
//!   still decoded, because long-lived daemons replay archived payloads
//!   framed this way.
//! - **Revision 2** uses the short length form (one byte below 255,
//!   otherwise `0xFF` plus 4 bytes) and is the only form this crate emits.
//!
//! Decoding dispatches on each value's own tag, so revisions may mix
//! freely inside one container. See [`tags`] for the assignments.
//!
//! ```rust
//! use aerolink::codec;
//! use aerolink::types::Variant;
//!
//! let encoded = codec::encode(&Variant::Integer(42));
//! let (decoded, consumed) = codec::decode(&encoded)?;
//! assert_eq!(decoded, Variant::Integer(42));
//! assert_eq!(consumed, encoded.len());
//! # Ok::<(), aerolink::LinkError>(())
//! ```
//!
//! [`Variant`]: crate::types::Variant

mod cursor;
mod decode;
mod encode;
pub mod tags;

pub use decode::decode;
pub use encode::{encode, encode_into};

pub(crate) use cursor::ByteCursor;
pub(crate) use decode::decode_value;
pub(crate) use encode::write_short_len;
