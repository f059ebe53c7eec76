//! Candidate lists: the in-memory form of an index record.

use bytes::Bytes;
use std::cmp::Ordering;

/// Fixed value ordering shared by sort, merge, and binary search.
///
/// Longer values order first; byte comparison breaks ties. The ordering
/// is arbitrary, but it must stay identical everywhere or the merge
/// union stops deduplicating. For fixed-width GUIDs it degenerates to
/// plain ascending byte order.
pub(crate) fn val_cmp(a: &[u8], b: &[u8]) -> Ordering {
    b.len().cmp(&a.len()).then_with(|| a.cmp(b))
}

/// A list of candidate values: DN strings in DN mode, 16-byte GUIDs in
/// GUID mode.
///
/// GUID-mode lists are kept sorted at all times; DN-mode lists stay in
/// insertion order and are only sorted when a union needs to merge.
///
/// A `strict` list must never be widened: the one-level index is
/// authoritative for the children of a parent, and intersection
/// shortcuts that over-approximate would break that authority.
#[derive(Debug, Clone, Default)]
pub(crate) struct DnList {
    values: Vec<Bytes>,
    strict: bool,
}

impl DnList {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_values(values: Vec<Bytes>) -> Self {
        Self {
            values,
            strict: false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub(crate) fn values(&self) -> &[Bytes] {
        &self.values
    }

    pub(crate) fn strict(&self) -> bool {
        self.strict
    }

    pub(crate) fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    pub(crate) fn push(&mut self, value: Bytes) {
        self.values.push(value);
    }

    pub(crate) fn remove(&mut self, index: usize) {
        self.values.remove(index);
    }

    /// Finds a value, or `None`.
    ///
    /// DN mode is a linear scan with exact byte equality. GUID mode is
    /// a greatest-lower-bound binary search that only accepts an exact
    /// hit: an absent key must fail even when a successor exists.
    pub(crate) fn find(&self, needle: &[u8], guid_mode: bool) -> Option<usize> {
        if guid_mode {
            self.values
                .binary_search_by(|v| val_cmp(v, needle))
                .ok()
        } else {
            self.values.iter().position(|v| v.as_ref() == needle)
        }
    }

    /// Sorts the list by [`val_cmp`]. A no-op for GUID-mode lists,
    /// which are sorted by construction.
    pub(crate) fn sort(&mut self, guid_mode: bool) {
        if self.values.len() < 2 || guid_mode {
            return;
        }
        self.values.sort_unstable_by(|a, b| val_cmp(a, b));
    }

    /// Splices a GUID into its sorted position.
    ///
    /// Returns true if an equal value was already present; the
    /// duplicate is retained either way.
    pub(crate) fn insert_guid(&mut self, guid: Bytes) -> bool {
        match self.values.binary_search_by(|v| val_cmp(v, &guid)) {
            Ok(pos) => {
                self.values.insert(pos, guid);
                true
            }
            Err(pos) => {
                self.values.insert(pos, guid);
                false
            }
        }
    }

    /// `self = self | other`, deduplicating.
    ///
    /// Union never sets `strict`: a union result is not authoritative
    /// for anything.
    pub(crate) fn union_with(&mut self, mut other: DnList, guid_mode: bool) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            self.values = other.values;
            return;
        }

        self.sort(guid_mode);
        other.sort(guid_mode);

        let mut merged = Vec::with_capacity(self.values.len() + other.values.len());
        let mut i = 0;
        let mut j = 0;
        while i < self.values.len() || j < other.values.len() {
            let cmp = if i >= self.values.len() {
                Ordering::Greater
            } else if j >= other.values.len() {
                Ordering::Less
            } else {
                val_cmp(&self.values[i], &other.values[j])
            };
            match cmp {
                Ordering::Less => {
                    merged.push(self.values[i].clone());
                    i += 1;
                }
                Ordering::Greater => {
                    merged.push(other.values[j].clone());
                    j += 1;
                }
                Ordering::Equal => {
                    merged.push(self.values[i].clone());
                    i += 1;
                    j += 1;
                }
            }
        }
        self.values = merged;
    }

    /// `self = self & other`.
    ///
    /// When one side is tiny and the other large, the tiny side is kept
    /// unchanged as an over-approximation - the mandatory re-match after
    /// candidate fetch filters the excess. The shortcut is forbidden
    /// when the larger side is strict, since a strict list must never
    /// be widened. `strict` is sticky across real intersections.
    pub(crate) fn intersect_with(&mut self, other: &DnList, guid_mode: bool) {
        if self.is_empty() {
            return;
        }
        if other.is_empty() {
            self.values.clear();
            return;
        }

        if self.values.len() < 2 && other.values.len() > 10 && !other.strict {
            return;
        }
        if other.values.len() < 2 && self.values.len() > 10 && !self.strict {
            self.values = other.values.clone();
            return;
        }

        let kept = {
            let (short, long): (&[Bytes], &DnList) = if self.values.len() > other.values.len() {
                (&other.values, &*self)
            } else {
                (&self.values, other)
            };
            let mut kept = Vec::with_capacity(short.len());
            for value in short {
                if long.find(value, guid_mode).is_some() {
                    kept.push(value.clone());
                }
            }
            kept
        };

        self.strict |= other.strict;
        self.values = kept;
    }
}
