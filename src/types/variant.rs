//! The variant value model carried by both wire protocols.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{LinkError, Result};

/// A self-describing telemetry value.
///
/// This is the closed set of value shapes the acquisition system produces:
/// four scalars, two byte-oriented payloads, and six containers. Containers
/// nest arbitrarily, so a `Hash` can hold an `Array` of `Matrix` values.
///
/// Keyed containers (`Hash`, `Overlay`, metadata maps) compare without
/// regard to key order. `Keyframe` preserves the order its frames were
/// decoded in.
#[derive(Debug, Clone, PartialEq)]
pub enum Variant {
    /// The absence of a value. Decodes from a bare tag.
    Empty,
    /// 64-bit float.
    Real(f64),
    /// 64-bit signed integer.
    Integer(i64),
    /// Boolean, one byte on the wire.
    Boolean(bool),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Unordered set of string flags.
    Flags(BTreeSet<String>),
    /// Ordered sequence of values.
    Array(Vec<Variant>),
    /// N-dimensional float matrix. `values.len()` always equals the product
    /// of `shape`; use [`Variant::matrix`] to build one safely.
    Matrix { shape: Vec<usize>, values: Vec<f64> },
    /// String-keyed map.
    Hash(BTreeMap<String, Variant>),
    /// Time-keyed frames, kept in wire order.
    Keyframe(Vec<(f64, Variant)>),
    /// Typed metadata describing another stream.
    Metadata(Metadata),
    /// String-keyed map layered over another value, distinct from `Hash`
    /// on the wire.
    Overlay(BTreeMap<String, Variant>),
}

/// Metadata describing a measurement stream.
///
/// `entries` holds the description itself (smoothing, realtime policy,
/// units, and so on). Kinds that describe container streams additionally
/// carry `children`, a per-element metadata map. The two maps are encoded
/// separately and never merge.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    /// The described stream's value kind.
    pub kind: MetadataKind,
    /// Description entries for the stream itself.
    pub entries: BTreeMap<String, Variant>,
    /// Element descriptions, present only for kinds with children.
    pub children: BTreeMap<String, Variant>,
}

impl Metadata {
    /// Creates empty metadata of the given kind.
    pub fn new(kind: MetadataKind) -> Self {
        Self { kind, entries: BTreeMap::new(), children: BTreeMap::new() }
    }
}

/// The value kind a [`Metadata`] describes.
///
/// The wire tag of a metadata value is a base tag plus this kind's offset,
/// in the declaration order below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataKind {
    Real,
    Integer,
    Boolean,
    Text,
    Bytes,
    Flags,
    Array,
    Matrix,
    Keyframe,
    Hash,
}

impl MetadataKind {
    /// Every kind, in wire-offset order.
    pub const ALL: [MetadataKind; 10] = [
        MetadataKind::Real,
        MetadataKind::Integer,
        MetadataKind::Boolean,
        MetadataKind::Text,
        MetadataKind::Bytes,
        MetadataKind::Flags,
        MetadataKind::Array,
        MetadataKind::Matrix,
        MetadataKind::Keyframe,
        MetadataKind::Hash,
    ];

    /// Offset added to the metadata base tag on the wire.
    pub fn wire_offset(self) -> u8 {
        match self {
            MetadataKind::Real => 0,
            MetadataKind::Integer => 1,
            MetadataKind::Boolean => 2,
            MetadataKind::Text => 3,
            MetadataKind::Bytes => 4,
            MetadataKind::Flags => 5,
            MetadataKind::Array => 6,
            MetadataKind::Matrix => 7,
            MetadataKind::Keyframe => 8,
            MetadataKind::Hash => 9,
        }
    }

    /// The kind for a wire offset, if it is in range.
    pub fn from_wire_offset(offset: u8) -> Option<Self> {
        Self::ALL.get(offset as usize).copied()
    }

    /// Whether metadata of this kind carries a `children` map.
    ///
    /// Container streams whose elements can be described individually do;
    /// scalar and byte-oriented streams do not.
    pub fn has_children(self) -> bool {
        matches!(self, MetadataKind::Array | MetadataKind::Keyframe | MetadataKind::Hash)
    }
}

impl Variant {
    /// Builds a matrix, checking that `values` fills `shape` exactly.
    ///
    /// The dimension count is one byte on the wire, so shapes are capped
    /// at 255 dimensions.
    pub fn matrix(shape: Vec<usize>, values: Vec<f64>) -> Result<Self> {
        if shape.len() > u8::MAX as usize {
            return Err(LinkError::encoding_error(
                "matrix",
                format!("{} dimensions exceed the wire limit of 255", shape.len()),
            ));
        }
        let expected = shape
            .iter()
            .try_fold(1usize, |product, &dim| product.checked_mul(dim))
            .ok_or_else(|| {
                LinkError::encoding_error("matrix", format!("shape {shape:?} overflows"))
            })?;
        if expected != values.len() {
            return Err(LinkError::encoding_error(
                "matrix",
                format!("shape {shape:?} needs {expected} values, got {}", values.len()),
            ));
        }
        Ok(Variant::Matrix { shape, values })
    }

    /// The float payload, if this is a `Real`.
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Variant::Real(value) => Some(*value),
            _ => None,
        }
    }

    /// The integer payload, if this is an `Integer`.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Variant::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// The boolean payload, if this is a `Boolean`.
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Variant::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    /// The text payload, if this is a `Text`.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Variant::Text(value) => Some(value),
            _ => None,
        }
    }

    /// Looks up `key` in any keyed container.
    ///
    /// For metadata this consults the description entries, not the
    /// children. Non-keyed variants return `None`.
    pub fn get(&self, key: &str) -> Option<&Variant> {
        match self {
            Variant::Hash(map) | Variant::Overlay(map) => map.get(key),
            Variant::Metadata(meta) => meta.entries.get(key),
            _ => None,
        }
    }

    /// Loose truthiness: `Boolean` by value, numbers by non-zero, anything
    /// else false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Variant::Boolean(value) => *value,
            Variant::Integer(value) => *value != 0,
            Variant::Real(value) => *value != 0.0,
            _ => false,
        }
    }
}
