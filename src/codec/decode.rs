//! Tag-dispatching variant decoder.
//!
//! Dispatch happens per value, not per buffer, so a revision-2 container
//! arriving from a daemon that re-frames archived revision-1 payloads can
//! legally hold revision-1 children and still decode.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{LinkError, Result};
use crate::types::{Metadata, MetadataKind, Variant};

use super::cursor::ByteCursor;
use super::tags;

/// Hard ceiling on container nesting in hostile buffers.
const MAX_NESTING: usize = 128;

/// Deserializes one value from the front of `bytes`.
///
/// Returns the value together with the number of bytes consumed; callers
/// framing several values back to back resume from that offset. Trailing
/// bytes are not an error here.
pub fn decode(bytes: &[u8]) -> Result<(Variant, usize)> {
    let mut cursor = ByteCursor::new(bytes);
    let value = decode_value(&mut cursor)?;
    Ok((value, cursor.position()))
}

pub(crate) fn decode_value(cursor: &mut ByteCursor<'_>) -> Result<Variant> {
    decode_at(cursor, 0)
}

/// Which length form the surrounding tag dictates.
#[derive(Clone, Copy)]
enum Revision {
    V1,
    V2,
}

impl Revision {
    fn read_len(self, cursor: &mut ByteCursor<'_>, what: &str) -> Result<usize> {
        match self {
            Revision::V1 => cursor.read_v1_len(what),
            Revision::V2 => cursor.read_short_len(what),
        }
    }
}

fn decode_at(cursor: &mut ByteCursor<'_>, depth: usize) -> Result<Variant> {
    if depth > MAX_NESTING {
        return Err(LinkError::encoding_error(
            "variant",
            format!("nesting exceeds {MAX_NESTING} levels"),
        ));
    }

    let tag = cursor.read_u8("variant tag")?;
    match tag {
        tags::EMPTY => Ok(Variant::Empty),
        tags::REAL => Ok(Variant::Real(cursor.read_f64_le("real value")?)),
        tags::INTEGER => Ok(Variant::Integer(cursor.read_i64_le("integer value")?)),
        tags::BOOLEAN => Ok(Variant::Boolean(cursor.read_u8("boolean value")? != 0)),

        tags::v2::TEXT => {
            let len = cursor.read_short_len("text length")?;
            Ok(Variant::Text(cursor.read_utf8(len, "text value")?))
        }
        tags::v2::BYTES => {
            let len = cursor.read_short_len("bytes length")?;
            Ok(Variant::Bytes(cursor.read_bytes(len, "bytes value")?.to_vec()))
        }
        tags::v2::FLAGS => decode_flags(cursor, Revision::V2),
        tags::v2::ARRAY => decode_array(cursor, Revision::V2, depth),
        tags::v2::MATRIX => decode_matrix(cursor, Revision::V2),
        tags::v2::HASH => Ok(Variant::Hash(decode_map(cursor, Revision::V2, depth)?)),
        tags::v2::KEYFRAME => decode_keyframe(cursor, Revision::V2, depth),
        tags::v2::METADATA_BASE..=tags::v2::METADATA_LAST => {
            decode_metadata(cursor, tag - tags::v2::METADATA_BASE, Revision::V2, depth)
        }
        tags::v2::OVERLAY => Ok(Variant::Overlay(decode_map(cursor, Revision::V2, depth)?)),

        tags::v1::TEXT => {
            let len = cursor.read_v1_len("text length")?;
            let text = cursor.read_utf8(len, "text value")?;
            skip_localizations(cursor)?;
            Ok(Variant::Text(text))
        }
        tags::v1::BYTES => {
            let len = cursor.read_v1_len("bytes length")?;
            Ok(Variant::Bytes(cursor.read_bytes(len, "bytes value")?.to_vec()))
        }
        tags::v1::FLAGS => decode_flags(cursor, Revision::V1),
        tags::v1::ARRAY => decode_array(cursor, Revision::V1, depth),
        tags::v1::MATRIX => decode_matrix(cursor, Revision::V1),
        tags::v1::HASH => Ok(Variant::Hash(decode_map(cursor, Revision::V1, depth)?)),
        tags::v1::KEYFRAME => decode_keyframe(cursor, Revision::V1, depth),
        tags::v1::METADATA_BASE..=tags::v1::METADATA_LAST => {
            decode_metadata(cursor, tag - tags::v1::METADATA_BASE, Revision::V1, depth)
        }
        tags::v1::OVERLAY => Ok(Variant::Overlay(decode_map(cursor, Revision::V1, depth)?)),

        other => Err(LinkError::encoding_error(
            "variant tag",
            format!("unrecognized tag {other}"),
        )),
    }
}

fn decode_flags(cursor: &mut ByteCursor<'_>, revision: Revision) -> Result<Variant> {
    let count = revision.read_len(cursor, "flag count")?;
    let mut flags = BTreeSet::new();
    for _ in 0..count {
        let len = revision.read_len(cursor, "flag length")?;
        flags.insert(cursor.read_utf8(len, "flag")?);
    }
    Ok(Variant::Flags(flags))
}

fn decode_array(cursor: &mut ByteCursor<'_>, revision: Revision, depth: usize) -> Result<Variant> {
    let count = revision.read_len(cursor, "array count")?;
    let mut items = Vec::new();
    for _ in 0..count {
        items.push(decode_at(cursor, depth + 1)?);
    }
    Ok(Variant::Array(items))
}

fn decode_matrix(cursor: &mut ByteCursor<'_>, revision: Revision) -> Result<Variant> {
    let count = revision.read_len(cursor, "matrix value count")?;
    let mut values = Vec::new();
    for _ in 0..count {
        values.push(cursor.read_f64_le("matrix value")?);
    }
    let dimensions = cursor.read_u8("matrix dimension count")?;
    let mut shape = Vec::with_capacity(dimensions as usize);
    for _ in 0..dimensions {
        shape.push(revision.read_len(cursor, "matrix extent")?);
    }

    let expected = shape
        .iter()
        .try_fold(1usize, |product, &dim| product.checked_mul(dim))
        .ok_or_else(|| LinkError::encoding_error("matrix", format!("shape {shape:?} overflows")))?;
    if expected != values.len() {
        return Err(LinkError::encoding_error(
            "matrix",
            format!("shape {shape:?} needs {expected} values, got {}", values.len()),
        ));
    }
    Ok(Variant::Matrix { shape, values })
}

fn decode_map(
    cursor: &mut ByteCursor<'_>,
    revision: Revision,
    depth: usize,
) -> Result<BTreeMap<String, Variant>> {
    let count = revision.read_len(cursor, "map entry count")?;
    let mut map = BTreeMap::new();
    for _ in 0..count {
        let len = revision.read_len(cursor, "map key length")?;
        let key = cursor.read_utf8(len, "map key")?;
        let value = decode_at(cursor, depth + 1)?;
        map.insert(key, value);
    }
    Ok(map)
}

fn decode_keyframe(
    cursor: &mut ByteCursor<'_>,
    revision: Revision,
    depth: usize,
) -> Result<Variant> {
    let count = revision.read_len(cursor, "keyframe count")?;
    let mut frames = Vec::new();
    for _ in 0..count {
        let time = cursor.read_f64_le("keyframe time")?;
        let value = decode_at(cursor, depth + 1)?;
        frames.push((time, value));
    }
    Ok(Variant::Keyframe(frames))
}

fn decode_metadata(
    cursor: &mut ByteCursor<'_>,
    offset: u8,
    revision: Revision,
    depth: usize,
) -> Result<Variant> {
    let kind = MetadataKind::from_wire_offset(offset).ok_or_else(|| {
        LinkError::encoding_error("metadata", format!("kind offset {offset} out of range"))
    })?;
    let entries = decode_map(cursor, revision, depth)?;
    let children = if kind.has_children() {
        decode_map(cursor, revision, depth)?
    } else {
        BTreeMap::new()
    };
    Ok(Variant::Metadata(Metadata { kind, entries, children }))
}

/// Revision-1 text carries a localization table after the primary string.
/// Nothing downstream uses it; parse and discard.
fn skip_localizations(cursor: &mut ByteCursor<'_>) -> Result<()> {
    let pairs = cursor.read_v1_len("localization count")?;
    for _ in 0..pairs {
        let locale_len = cursor.read_v1_len("localization locale length")?;
        cursor.read_bytes(locale_len, "localization locale")?;
        let text_len = cursor.read_v1_len("localization text length")?;
        cursor.read_bytes(text_len, "localization text")?;
    }
    Ok(())
}
