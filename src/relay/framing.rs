//! Batched block assembly for the collector link.
//!
//! Pending values are grouped by encoding shape into three buffers
//! that become the FLOATS, FLOAT_ARRAYS, and VARIANTS sub-blocks of
//! one DATA_BLOCK_BEGIN message. Names are interned against the
//! uplink's own table and announced in a DEFINE_NAMES message that
//! always precedes the first data referencing them.

use std::collections::HashSet;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::codec::{self, write_short_len};
use crate::intern::NameTable;
use crate::types::{StreamName, Variant};

use super::opcodes::{block, to_collector};

/// Any single buffer reaching this size forces a partial flush.
const FLUSH_THRESHOLD: usize = 4096;

pub(crate) struct BlockBuilder {
    names: NameTable,
    announce: BytesMut,
    floats: BytesMut,
    float_arrays: BytesMut,
    variants: BytesMut,
    float_entries: usize,
    float_array_entries: usize,
    variant_entries: usize,
    /// Indices referenced by the buffers since the last flush. A
    /// recycle that would evict one of these must flush first, or the
    /// index would mean two different names inside one batch.
    referenced: HashSet<u16>,
}

impl BlockBuilder {
    pub(crate) fn new() -> Self {
        Self {
            names: NameTable::new(),
            announce: BytesMut::new(),
            floats: BytesMut::new(),
            float_arrays: BytesMut::new(),
            variants: BytesMut::new(),
            float_entries: 0,
            float_array_entries: 0,
            variant_entries: 0,
            referenced: HashSet::new(),
        }
    }

    /// Adds one value, appending any complete frames to `out`.
    pub(crate) fn push(&mut self, name: &StreamName, value: &Variant, out: &mut Vec<Bytes>) {
        let index = match self.names.lookup(name) {
            Some(index) => index,
            None => {
                if let Some(candidate) = self.names.would_recycle() {
                    if self.referenced.contains(&candidate) {
                        self.flush_into(out);
                    }
                }
                let (index, evicted) = self.names.intern(name);
                if let Some(old) = evicted {
                    debug!("Uplink name slot {index} recycled away from {old}");
                }
                let mut encoded = Vec::new();
                name.encode_into(&mut encoded);
                self.announce.put_slice(&encoded);
                index
            }
        };
        self.referenced.insert(index);

        match value {
            Variant::Real(v) => {
                self.floats.put_u16_le(index);
                self.floats.put_f32_le(*v as f32);
                self.float_entries += 1;
            }
            Variant::Array(items)
                if items.iter().all(|item| matches!(item, Variant::Real(_))) =>
            {
                self.float_arrays.put_u16_le(index);
                write_short_len(&mut self.float_arrays, items.len());
                for item in items {
                    if let Variant::Real(v) = item {
                        self.float_arrays.put_f32_le(*v as f32);
                    }
                }
                self.float_array_entries += 1;
            }
            other => {
                self.variants.put_u16_le(index);
                self.variants.put_slice(&codec::encode(other));
                self.variant_entries += 1;
            }
        }

        if self.announce.len() >= FLUSH_THRESHOLD
            || self.floats.len() >= FLUSH_THRESHOLD
            || self.float_arrays.len() >= FLUSH_THRESHOLD
            || self.variants.len() >= FLUSH_THRESHOLD
        {
            self.flush_into(out);
        }
    }

    /// Closes the current batch, appending its frames to `out`.
    pub(crate) fn finish(&mut self, out: &mut Vec<Bytes>) {
        self.flush_into(out);
    }

    fn flush_into(&mut self, out: &mut Vec<Bytes>) {
        if !self.announce.is_empty() {
            let mut frame = BytesMut::with_capacity(1 + self.announce.len());
            frame.put_u8(to_collector::DEFINE_NAMES);
            frame.extend_from_slice(&self.announce);
            out.push(frame.freeze());
            self.announce.clear();
        }

        let entries = self.float_entries + self.float_array_entries + self.variant_entries;
        if entries == 0 {
            self.referenced.clear();
            return;
        }

        let mut frame = BytesMut::new();
        frame.put_u8(to_collector::DATA_BLOCK_BEGIN);
        if self.float_entries > 0 {
            frame.put_u8(block::FLOATS);
            write_short_len(&mut frame, self.float_entries);
            frame.extend_from_slice(&self.floats);
        }
        if self.float_array_entries > 0 {
            frame.put_u8(block::FLOAT_ARRAYS);
            write_short_len(&mut frame, self.float_array_entries);
            frame.extend_from_slice(&self.float_arrays);
        }
        if self.variant_entries > 0 {
            frame.put_u8(block::VARIANTS);
            write_short_len(&mut frame, self.variant_entries);
            frame.extend_from_slice(&self.variants);
        }
        frame.put_u8(block::FINAL);
        out.push(frame.freeze());

        self.floats.clear();
        self.float_arrays.clear();
        self.variants.clear();
        self.float_entries = 0;
        self.float_array_entries = 0;
        self.variant_entries = 0;
        self.referenced.clear();
    }
}
