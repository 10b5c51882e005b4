//! Wire tag assignments for both codec revisions.
//!
//! Scalar tags are shared. Every container and byte-oriented kind has two
//! tags: a legacy revision-1 tag this crate only decodes, and the
//! revision-2 tag it both encodes and decodes. Metadata occupies a block
//! of ten tags per revision, one per [`MetadataKind`] wire offset.
//!
//! [`MetadataKind`]: crate::types::MetadataKind

/// The absence of a value.
pub const EMPTY: u8 = 0;
/// 64-bit little-endian float.
pub const REAL: u8 = 1;
/// 64-bit little-endian signed integer.
pub const INTEGER: u8 = 2;
/// One byte, zero or non-zero.
pub const BOOLEAN: u8 = 3;

/// Legacy revision-1 tags. Accepted on decode, never emitted.
pub mod v1 {
    pub const TEXT: u8 = 4;
    pub const BYTES: u8 = 5;
    pub const FLAGS: u8 = 6;
    pub const ARRAY: u8 = 7;
    pub const MATRIX: u8 = 8;
    pub const HASH: u8 = 9;
    pub const KEYFRAME: u8 = 10;
    pub const METADATA_BASE: u8 = 11;
    pub const METADATA_LAST: u8 = 20;
    pub const OVERLAY: u8 = 21;
}

/// Revision-2 tags, the encoding this crate emits.
pub mod v2 {
    pub const TEXT: u8 = 22;
    pub const BYTES: u8 = 23;
    pub const FLAGS: u8 = 24;
    pub const HASH: u8 = 25;
    pub const ARRAY: u8 = 26;
    pub const MATRIX: u8 = 27;
    pub const KEYFRAME: u8 = 28;
    pub const METADATA_BASE: u8 = 29;
    pub const METADATA_LAST: u8 = 38;
    pub const OVERLAY: u8 = 39;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revisions_do_not_overlap() {
        assert!(BOOLEAN < v1::TEXT);
        assert!(v1::OVERLAY < v2::TEXT);
        assert_eq!(v1::METADATA_LAST - v1::METADATA_BASE, 9);
        assert_eq!(v2::METADATA_LAST - v2::METADATA_BASE, 9);
        assert_eq!(v2::OVERLAY, 39);
    }
}
