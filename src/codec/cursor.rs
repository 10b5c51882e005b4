//! Bounds-checked read cursor over framed message bytes.

use crate::error::{LinkError, Result};

/// A forward-only cursor over a byte slice.
///
/// Every read checks the remaining length first and fails with an
/// [`LinkError::Encoding`] naming the field being read, so a truncated or
/// hostile buffer can never index past the end. The underlying slice is
/// never copied or shrunk; the cursor just advances its position.
pub(crate) struct ByteCursor<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> ByteCursor<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Bytes consumed so far.
    pub(crate) fn position(&self) -> usize {
        self.position
    }

    /// Bytes still available.
    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Takes `len` bytes, advancing the cursor.
    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(LinkError::encoding_error(
                what,
                format!(
                    "need {len} bytes at offset {}, only {remaining} available",
                    self.position
                ),
            ));
        }
        let slice = &self.data[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    pub(crate) fn read_u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    pub(crate) fn read_u16_le(&mut self, what: &str) -> Result<u16> {
        let bytes = self.take(2, what)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn read_u32_le(&mut self, what: &str) -> Result<u32> {
        let bytes = self.take(4, what)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn read_i64_le(&mut self, what: &str) -> Result<i64> {
        let bytes = self.take(8, what)?;
        Ok(i64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]))
    }

    pub(crate) fn read_f64_le(&mut self, what: &str) -> Result<f64> {
        let bytes = self.take(8, what)?;
        Ok(f64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]))
    }

    pub(crate) fn read_bytes(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        self.take(len, what)
    }

    /// Reads the short length form: one byte below 255, otherwise a 0xFF
    /// marker followed by a 4-byte little-endian length.
    pub(crate) fn read_short_len(&mut self, what: &str) -> Result<usize> {
        let first = self.read_u8(what)?;
        if first < 0xFF {
            Ok(first as usize)
        } else {
            Ok(self.read_u32_le(what)? as usize)
        }
    }

    /// Reads the legacy revision-1 length form, always 4 bytes.
    pub(crate) fn read_v1_len(&mut self, what: &str) -> Result<usize> {
        Ok(self.read_u32_le(what)? as usize)
    }

    pub(crate) fn read_utf8(&mut self, len: usize, what: &str) -> Result<String> {
        let bytes = self.take(len, what)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| LinkError::encoding_error(what, "field is not valid UTF-8"))
    }

    /// Consumes everything left as UTF-8 text.
    pub(crate) fn read_remaining_utf8(&mut self, what: &str) -> Result<String> {
        let len = self.remaining();
        self.read_utf8(len, what)
    }
}
