//! Bounded name↔index interning shared by both protocol legs.
//!
//! Realtime values travel with a 16-bit index instead of a full
//! [`StreamName`]. Each side of a connection keeps a [`NameTable`] and
//! allocates indices by one deterministic rule: densely from zero until
//! the space is exhausted, then round-robin recycling of the oldest
//! slots. Announcements therefore carry no index at all; as long as both
//! ends apply the rule to the same announcement sequence they stay in
//! lockstep.
//!
//! Tables are per-connection state. A reconnect starts from an empty
//! table on both sides.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{LinkError, Result};
use crate::types::StreamName;

/// Total index space of one table: every `u16` wire index.
pub const NAME_TABLE_CAPACITY: usize = 1 << 16;

/// Bidirectional name↔index map with deterministic allocation.
///
/// Names are reference-counted so a resolved name can be handed to
/// consumers without copying the strings on every value.
pub struct NameTable {
    forward: HashMap<Arc<StreamName>, u16>,
    reverse: Vec<Arc<StreamName>>,
    next_recycle: u16,
}

impl NameTable {
    pub fn new() -> Self {
        Self { forward: HashMap::new(), reverse: Vec::new(), next_recycle: 0 }
    }

    /// Number of live bindings.
    pub fn len(&self) -> usize {
        self.reverse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reverse.is_empty()
    }

    /// Whether every index is bound and the next allocation will recycle.
    pub fn is_full(&self) -> bool {
        self.reverse.len() == NAME_TABLE_CAPACITY
    }

    /// The index bound to `name`, if any, without allocating.
    pub fn lookup(&self, name: &StreamName) -> Option<u16> {
        self.forward.get(name).copied()
    }

    /// The index the next fresh allocation would evict, if the table is
    /// full. Senders use this to flush buffers that still reference the
    /// victim before announcing a new name.
    pub fn would_recycle(&self) -> Option<u16> {
        self.is_full().then_some(self.next_recycle)
    }

    /// Binds `name` on the sending side, allocating if it is new.
    ///
    /// Returns the index and, when allocation recycled a slot, the name
    /// that lost its binding.
    pub fn intern(&mut self, name: &StreamName) -> (u16, Option<Arc<StreamName>>) {
        if let Some(&index) = self.forward.get(name) {
            return (index, None);
        }
        self.allocate(Arc::new(name.clone()))
    }

    /// Binds an announced `name` on the receiving side.
    ///
    /// The announcement carries no index; the binding falls out of the
    /// allocation rule. A repeated announcement of a live name keeps its
    /// existing index.
    pub fn bind(&mut self, name: StreamName) -> (u16, Option<Arc<StreamName>>) {
        if let Some(&index) = self.forward.get(&name) {
            return (index, None);
        }
        self.allocate(Arc::new(name))
    }

    /// The name bound to `index`.
    pub fn resolve(&self, index: u16) -> Result<&Arc<StreamName>> {
        self.reverse.get(index as usize).ok_or(LinkError::UnknownIndex { index })
    }

    /// Drops every binding and restarts allocation from index zero.
    pub fn clear(&mut self) {
        self.forward.clear();
        self.reverse.clear();
        self.next_recycle = 0;
    }

    fn allocate(&mut self, name: Arc<StreamName>) -> (u16, Option<Arc<StreamName>>) {
        if !self.is_full() {
            let index = self.reverse.len() as u16;
            self.reverse.push(Arc::clone(&name));
            self.forward.insert(name, index);
            return (index, None);
        }

        let index = self.next_recycle;
        let evicted = std::mem::replace(&mut self.reverse[index as usize], Arc::clone(&name));
        // The evicted forward entry must go before the insert so the maps
        // never disagree, even transiently.
        self.forward.remove(evicted.as_ref());
        self.forward.insert(name, index);
        self.next_recycle = index.wrapping_add(1);
        (index, Some(evicted))
    }
}

impl Default for NameTable {
    fn default() -> Self {
        Self::new()
    }
}
