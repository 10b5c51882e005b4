//! Stream identity for realtime measurements.

use std::collections::BTreeSet;
use std::fmt;

use crate::codec::{ByteCursor, write_short_len};
use crate::error::Result;

/// Archive suffix marking the metadata companion of a data stream.
const META_SUFFIX: &str = "_meta";

/// Identity of one measurement stream.
///
/// A stream is addressed by four parts: the station that produced it, the
/// archive it belongs to (`raw`, `rt_instant`, averaged archives, and their
/// `_meta` companions), the variable name, and a set of flavor qualifiers.
/// Station, archive, and flavors are case-insensitive and canonicalized to
/// lowercase on construction; the variable keeps its case as given.
///
/// Flavor sets compare without regard to order, so
/// `nil:raw:Temp` with flavors `{pm10, dry}` and `{dry, pm10}` are the same
/// stream and hash identically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamName {
    station: String,
    archive: String,
    variable: String,
    flavors: BTreeSet<String>,
}

impl StreamName {
    /// Station wildcard accepted by daemons as "whichever station you are".
    pub const ANY_STATION: &'static str = "_";

    /// Creates a stream name, canonicalizing case as it goes.
    pub fn new(
        station: impl Into<String>,
        archive: impl Into<String>,
        variable: impl Into<String>,
        flavors: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            station: station.into().to_lowercase(),
            archive: archive.into().to_lowercase(),
            variable: variable.into(),
            flavors: flavors
                .into_iter()
                .map(|flavor| flavor.into().to_lowercase())
                .collect(),
        }
    }

    /// The producing station, or [`Self::ANY_STATION`].
    pub fn station(&self) -> &str {
        &self.station
    }

    /// The archive this stream belongs to.
    pub fn archive(&self) -> &str {
        &self.archive
    }

    /// The variable name, case preserved.
    pub fn variable(&self) -> &str {
        &self.variable
    }

    /// The flavor qualifiers, lowercased and sorted.
    pub fn flavors(&self) -> &BTreeSet<String> {
        &self.flavors
    }

    /// Returns true when `flavor` is among the qualifiers, ignoring case.
    pub fn has_flavor(&self, flavor: &str) -> bool {
        self.flavors.contains(&flavor.to_lowercase())
    }

    /// Returns true when the station is the `_` wildcard.
    pub fn is_any_station(&self) -> bool {
        self.station == Self::ANY_STATION
    }

    /// Returns true when the archive carries the `_meta` suffix.
    pub fn is_meta(&self) -> bool {
        self.archive.ends_with(META_SUFFIX)
    }

    /// The archive with any `_meta` suffix removed.
    pub fn data_archive(&self) -> &str {
        self.archive.strip_suffix(META_SUFFIX).unwrap_or(&self.archive)
    }

    /// The data stream this name describes: itself, unless this is a
    /// metadata stream, in which case the `_meta` suffix is dropped.
    pub fn data_name(&self) -> StreamName {
        if self.is_meta() { self.with_archive(self.data_archive()) } else { self.clone() }
    }

    /// The metadata companion of this stream.
    pub fn meta_name(&self) -> StreamName {
        if self.is_meta() {
            self.clone()
        } else {
            self.with_archive(&format!("{}{META_SUFFIX}", self.archive))
        }
    }

    /// A copy of this name addressing a different archive.
    pub fn with_archive(&self, archive: &str) -> StreamName {
        StreamName {
            station: self.station.clone(),
            archive: archive.to_lowercase(),
            variable: self.variable.clone(),
            flavors: self.flavors.clone(),
        }
    }

    /// Serializes this name in wire order: station, archive, variable, then
    /// the flavors joined by single spaces, each field short-length-prefixed.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        write_field(buf, &self.station);
        write_field(buf, &self.archive);
        write_field(buf, &self.variable);
        let flavors = self.flavors.iter().map(String::as_str).collect::<Vec<_>>().join(" ");
        write_field(buf, &flavors);
    }

    /// Deserializes a name from the front of `bytes`, returning it together
    /// with the number of bytes consumed.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize)> {
        let mut cursor = ByteCursor::new(bytes);
        let name = Self::decode_from(&mut cursor)?;
        Ok((name, cursor.position()))
    }

    pub(crate) fn decode_from(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        let station = read_field(cursor, "station")?;
        let archive = read_field(cursor, "archive")?;
        let variable = read_field(cursor, "variable")?;
        let flavors = read_field(cursor, "flavors")?;
        Ok(Self::new(station, archive, variable, flavors.split_whitespace()))
    }
}

fn write_field(buf: &mut Vec<u8>, field: &str) {
    write_short_len(buf, field.len());
    buf.extend_from_slice(field.as_bytes());
}

fn read_field(cursor: &mut ByteCursor<'_>, what: &str) -> Result<String> {
    let len = cursor.read_short_len(what)?;
    cursor.read_utf8(len, what)
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.station, self.archive, self.variable)?;
        if !self.flavors.is_empty() {
            let flavors = self.flavors.iter().map(String::as_str).collect::<Vec<_>>().join("+");
            write!(f, ":{flavors}")?;
        }
        Ok(())
    }
}
