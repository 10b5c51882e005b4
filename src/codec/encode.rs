//! Revision-2 variant encoder.

use std::collections::BTreeMap;

use bytes::BufMut;

use crate::types::Variant;

use super::tags;

/// Serializes one value into a fresh buffer.
pub fn encode(value: &Variant) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_into(&mut buf, value);
    buf
}

/// Serializes one value onto the end of `buf`.
///
/// Encoding is infallible: every [`Variant`] has exactly one revision-2
/// wire form. Keyed containers serialize in sorted key order, so equal
/// values always produce identical bytes.
pub fn encode_into(buf: &mut Vec<u8>, value: &Variant) {
    match value {
        Variant::Empty => buf.push(tags::EMPTY),
        Variant::Real(v) => {
            buf.push(tags::REAL);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Variant::Integer(v) => {
            buf.push(tags::INTEGER);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Variant::Boolean(v) => {
            buf.push(tags::BOOLEAN);
            buf.push(u8::from(*v));
        }
        Variant::Text(text) => {
            buf.push(tags::v2::TEXT);
            write_short_bytes(buf, text.as_bytes());
        }
        Variant::Bytes(bytes) => {
            buf.push(tags::v2::BYTES);
            write_short_bytes(buf, bytes);
        }
        Variant::Flags(flags) => {
            buf.push(tags::v2::FLAGS);
            write_short_len(buf, flags.len());
            for flag in flags {
                write_short_bytes(buf, flag.as_bytes());
            }
        }
        Variant::Array(items) => {
            buf.push(tags::v2::ARRAY);
            write_short_len(buf, items.len());
            for item in items {
                encode_into(buf, item);
            }
        }
        Variant::Matrix { shape, values } => {
            buf.push(tags::v2::MATRIX);
            write_short_len(buf, values.len());
            for v in values {
                buf.extend_from_slice(&v.to_le_bytes());
            }
            debug_assert!(shape.len() <= u8::MAX as usize);
            buf.push(shape.len() as u8);
            for extent in shape {
                write_short_len(buf, *extent);
            }
        }
        Variant::Hash(map) => {
            buf.push(tags::v2::HASH);
            write_map(buf, map);
        }
        Variant::Keyframe(frames) => {
            buf.push(tags::v2::KEYFRAME);
            write_short_len(buf, frames.len());
            for (time, item) in frames {
                buf.extend_from_slice(&time.to_le_bytes());
                encode_into(buf, item);
            }
        }
        Variant::Metadata(meta) => {
            buf.push(tags::v2::METADATA_BASE + meta.kind.wire_offset());
            write_map(buf, &meta.entries);
            if meta.kind.has_children() {
                write_map(buf, &meta.children);
            }
        }
        Variant::Overlay(map) => {
            buf.push(tags::v2::OVERLAY);
            write_map(buf, map);
        }
    }
}

/// Writes the short length form: one byte below 255, otherwise a 0xFF
/// marker followed by a 4-byte little-endian length.
pub(crate) fn write_short_len<B: BufMut>(buf: &mut B, len: usize) {
    if len < 0xFF {
        buf.put_u8(len as u8);
    } else {
        debug_assert!(len <= u32::MAX as usize);
        buf.put_u8(0xFF);
        buf.put_u32_le(len as u32);
    }
}

fn write_short_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_short_len(buf, bytes.len());
    buf.extend_from_slice(bytes);
}

fn write_map(buf: &mut Vec<u8>, map: &BTreeMap<String, Variant>) {
    write_short_len(buf, map.len());
    for (key, value) in map {
        write_short_bytes(buf, key.as_bytes());
        encode_into(buf, value);
    }
}
