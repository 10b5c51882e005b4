//! Staging and classification of realtime values between flushes.
//!
//! Values accumulate here keyed by name, last value wins, first-seen
//! order preserved. Metadata streams are inspected as they pass to
//! maintain two per-variable sets that gate the ordinary value
//! streams: *unsmoothed* variables ride along with the next flush
//! instead of arming the timer, and *persistent* variables have their
//! instantaneous value re-dispatched under the `raw` archive while the
//! native `raw` value is suppressed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::trace;

use crate::types::{MetadataKind, StreamName, Variant};

const ARCHIVE_RAW: &str = "raw";
const ARCHIVE_INSTANT: &str = "rt_instant";

/// Variable identity with the archive stripped, so classification
/// learned from `raw_meta` applies to `raw` and `rt_instant` alike.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct VariableKey {
    station: String,
    variable: String,
    flavors: Vec<String>,
}

impl VariableKey {
    fn of(name: &StreamName) -> Self {
        Self {
            station: name.station().to_string(),
            variable: name.variable().to_string(),
            flavors: name.flavors().iter().cloned().collect(),
        }
    }
}

pub(crate) struct PendingValues {
    include_instant: bool,
    values: HashMap<Arc<StreamName>, Variant>,
    order: Vec<Arc<StreamName>>,
    unsmoothed: HashSet<VariableKey>,
    persistent: HashSet<VariableKey>,
}

impl PendingValues {
    pub(crate) fn new(include_instant: bool) -> Self {
        Self {
            include_instant,
            values: HashMap::new(),
            order: Vec::new(),
            unsmoothed: HashSet::new(),
            persistent: HashSet::new(),
        }
    }

    /// Stages one value. Returns true when the deferred flush timer
    /// should be armed on its account.
    pub(crate) fn queue(&mut self, name: Arc<StreamName>, value: Variant) -> bool {
        let archive = name.data_archive();
        let eligible =
            archive == ARCHIVE_RAW || (archive == ARCHIVE_INSTANT && self.include_instant);
        if !eligible {
            trace!("Ignoring value on non-forwarded archive {}", name.archive());
            return false;
        }

        let key = VariableKey::of(&name);
        if name.is_meta() {
            self.classify(&key, &value);
            self.insert(name, value);
            return !self.unsmoothed.contains(&key);
        }

        if self.include_instant && self.persistent.contains(&key) {
            if name.archive() == ARCHIVE_INSTANT {
                // Persistent values reach raw through their instant
                // stream, which updates promptly.
                let raw_copy = Arc::new(name.with_archive(ARCHIVE_RAW));
                self.insert(Arc::clone(&name), value.clone());
                self.insert(raw_copy, value);
                return !self.unsmoothed.contains(&key);
            }
            if name.archive() == ARCHIVE_RAW {
                trace!("Suppressing native raw value for persistent {name}");
                return false;
            }
        }

        self.insert(name, value);
        !self.unsmoothed.contains(&key)
    }

    /// True when nothing is staged.
    pub(crate) fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Drains every staged value in first-seen order. Classification
    /// survives the drain; it describes the variables, not the batch.
    pub(crate) fn take_batch(&mut self) -> Vec<(Arc<StreamName>, Variant)> {
        let order = std::mem::take(&mut self.order);
        order
            .into_iter()
            .filter_map(|name| {
                let value = self.values.remove(&name)?;
                Some((name, value))
            })
            .collect()
    }

    fn insert(&mut self, name: Arc<StreamName>, value: Variant) {
        if self.values.insert(Arc::clone(&name), value).is_some() {
            return;
        }
        self.order.push(name);
    }

    /// Updates the unsmoothed and persistent sets from one metadata
    /// value.
    fn classify(&mut self, key: &VariableKey, value: &Variant) {
        let scalar_kind = matches!(
            value,
            Variant::Metadata(meta) if matches!(
                meta.kind,
                MetadataKind::Text
                    | MetadataKind::Integer
                    | MetadataKind::Bytes
                    | MetadataKind::Boolean
            )
        );
        let mode = value
            .get("Smoothing")
            .and_then(|smoothing| smoothing.get("Mode"))
            .and_then(Variant::as_text);
        let bypassed = mode
            .is_some_and(|m| m.eq_ignore_ascii_case("bypass") || m.eq_ignore_ascii_case("none"));
        if scalar_kind || bypassed {
            self.unsmoothed.insert(key.clone());
        } else {
            self.unsmoothed.remove(key);
        }

        let persistent = value
            .get("Realtime")
            .and_then(|realtime| realtime.get("Persistent"))
            .is_some_and(Variant::is_truthy);
        if persistent {
            self.persistent.insert(key.clone());
        } else {
            self.persistent.remove(key);
        }
    }
}
