//! The transactional write buffer for index records.

use crate::index::DnList;
use std::collections::HashMap;

/// In-memory staging area for index mutations during a transaction.
///
/// Maps an index record DN to its current list. There is a single
/// staged entry per key: repeated mutations of the same index record
/// update the staged list in place, so an add/delete pair on one record
/// (the common shape of a modify) costs one store at commit instead of
/// two.
///
/// Within a transaction the buffer is the source of truth for every key
/// it holds; the backing store is only consulted for untouched keys.
#[derive(Debug, Default)]
pub(crate) struct WriteBuffer {
    staged: HashMap<String, DnList>,
}

impl WriteBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns the staged list for an index DN, if any.
    pub(crate) fn get(&self, index_dn: &str) -> Option<&DnList> {
        self.staged.get(index_dn)
    }

    /// Stages a list under an index DN, replacing any earlier staging.
    pub(crate) fn stage(&mut self, index_dn: String, list: DnList) {
        self.staged.insert(index_dn, list);
    }

    /// Drains the buffer in deterministic (key) order for commit.
    pub(crate) fn drain_sorted(&mut self) -> Vec<(String, DnList)> {
        let mut entries: Vec<_> = self.staged.drain().collect();
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        entries
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.staged.len()
    }
}
