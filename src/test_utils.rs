//! Shared value and name generators for tests and benchmarks.

#![cfg(any(test, feature = "benchmark"))]

use std::collections::BTreeMap;
use std::iter;

use crate::types::{Metadata, MetadataKind, StreamName, Variant};

/// One value of every supported kind, scalars first.
pub fn variant_suite() -> Vec<Variant> {
    let mut hash = BTreeMap::new();
    hash.insert("Count".to_string(), Variant::Integer(11));
    hash.insert("Units".to_string(), Variant::Text("Mm-1".to_string()));

    let mut metadata = Metadata::new(MetadataKind::Array);
    metadata.entries.insert("Units".to_string(), Variant::Text("Mm-1".to_string()));
    metadata
        .children
        .insert("0".to_string(), Variant::Metadata(Metadata::new(MetadataKind::Real)));

    let mut smoothing = BTreeMap::new();
    smoothing.insert("Mode".to_string(), Variant::Text("Bypass".to_string()));
    let mut overlay = BTreeMap::new();
    overlay.insert("Smoothing".to_string(), Variant::Hash(smoothing));

    vec![
        Variant::Empty,
        Variant::Real(21.5),
        Variant::Integer(-40),
        Variant::Boolean(true),
        Variant::Text("ambient".to_string()),
        Variant::Bytes(vec![0x00, 0xFF, 0x7F]),
        Variant::Flags(["dusty", "warmup"].into_iter().map(String::from).collect()),
        Variant::Array(vec![Variant::Real(1.0), Variant::Integer(2), Variant::Empty]),
        Variant::Matrix { shape: vec![2, 3], values: vec![0.0, 0.5, 1.0, 1.5, 2.0, 2.5] },
        Variant::Hash(hash),
        Variant::Keyframe(vec![(0.0, Variant::Real(0.0)), (1.5, Variant::Real(3.0))]),
        Variant::Metadata(metadata),
        Variant::Overlay(overlay),
    ]
}

/// A value with several container layers, for codec depth coverage.
pub fn layered_variant() -> Variant {
    let mut calibration = BTreeMap::new();
    calibration.insert(
        "coefficients".to_string(),
        Variant::Array(vec![Variant::Real(1.0035), Variant::Real(-0.0021)]),
    );
    calibration.insert(
        "history".to_string(),
        Variant::Keyframe(vec![
            (0.0, Variant::Real(1.0)),
            (86400.0, Variant::Real(1.0035)),
        ]),
    );

    let mut meta = Metadata::new(MetadataKind::Hash);
    meta.entries.insert("Description".to_string(), Variant::Text("scattering".to_string()));
    meta.entries.insert("Flags".to_string(), Variant::Flags(
        ["pm10", "stp"].into_iter().map(String::from).collect(),
    ));
    meta.children.insert("Calibration".to_string(), Variant::Hash(calibration));

    let mut top = BTreeMap::new();
    top.insert("meta".to_string(), Variant::Metadata(meta));
    top.insert("matrix".to_string(), Variant::Matrix {
        shape: vec![2, 2],
        values: vec![0.0, 1.0, 2.0, 3.0],
    });
    Variant::Hash(top)
}

/// Distinct stream names `nil:raw:Var_00000` onward.
pub fn sequential_names(count: usize) -> Vec<StreamName> {
    (0..count)
        .map(|i| StreamName::new("nil", "raw", format!("Var_{i:05}"), iter::empty::<&str>()))
        .collect()
}
