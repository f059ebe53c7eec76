//! Index mutation: adding and removing entries for a record.
//!
//! Add order is DN index first, attribute indices next, one-level index
//! last; delete mirrors it. A failed add is remediated by the caller
//! invoking delete for the same record, which these entry points do
//! themselves where the contract requires it.

use crate::database::Database;
use crate::dn::Dn;
use crate::error::{CoreError, CoreResult};
use crate::index::{format_index_key, DnList, Truncation, GUID_SIZE, IDXDN, IDXONE};
use crate::schema::ATTR_UNIQUE_INDEX;
use bytes::Bytes;
use dirdb_codec::{Element, Record, FLAG_FORCE_UNIQUE_INDEX};

impl Database {
    /// Inserts one (attribute, value) pair into its index record.
    fn index_add_one(
        &mut self,
        record: &Record,
        attr: &str,
        el_flags: u32,
        value: &[u8],
    ) -> CoreResult<()> {
        let max_key_length = self.config().max_key_length;
        let key = format_index_key(self.schema(), &self.catalog, max_key_length, attr, value)?;

        let unique = key.attr_flags & ATTR_UNIQUE_INDEX != 0
            || el_flags & FLAG_FORCE_UNIQUE_INDEX != 0;

        // Uniqueness cannot be guaranteed through a truncated key.
        if key.truncation == Truncation::Truncated && unique {
            let message = format!(
                "unique index key on {attr} in {} exceeds maximum key length of {max_key_length} (encoded)",
                record.dn
            );
            self.set_error(message.clone());
            return Err(CoreError::constraint(message));
        }

        let mut list = match self.dn_list_load(&key.dn) {
            Ok(list) => list,
            Err(CoreError::NoSuchObject) => DnList::new(),
            Err(e) => return Err(e),
        };

        if !list.is_empty() && attr == IDXDN {
            if key.truncation == Truncation::NotTruncated {
                // A duplicate DN creation attempt. Very normal; no
                // diagnostics, the caller remaps this for the user.
                return Err(CoreError::constraint("duplicate DN"));
            }
            // The DN keys were truncated, so the existing entries may
            // be other DNs sharing the key. Pull the records to check.
            let target = Dn::parse(&record.dn)?;
            for existing_value in list.values() {
                let backing = self.idx_to_key(existing_value)?;
                let Some(existing) = self.fetch_record_by_key(&backing)? else {
                    // The record has disappeared? Yes, this can happen.
                    continue;
                };
                if Dn::parse(&existing.dn)? == target {
                    return Err(CoreError::constraint("duplicate DN"));
                }
            }
        }

        if !list.is_empty() && unique {
            // No candidate scan needed here: long unique values were
            // banned above, so the key is exact.
            tracing::warn!(attr, dn = %record.dn, "unique index violation");
            let message = format!("unique index violation on {attr} in {}", record.dn);
            self.set_error(message.clone());
            return Err(CoreError::constraint(message));
        }

        if self.catalog.guid_mode() {
            let guid_attr = self
                .catalog
                .guid_attr()
                .expect("guid_mode implies attr")
                .to_string();
            let guid = record
                .first_value(&guid_attr)
                .ok_or_else(|| {
                    CoreError::operations(format!(
                        "record {} has no value for GUID attribute '{guid_attr}'",
                        record.dn
                    ))
                })?
                .clone();
            if guid.len() != GUID_SIZE {
                return Err(CoreError::operations(format!(
                    "GUID value on {} has length {}, expected {GUID_SIZE}",
                    record.dn,
                    guid.len()
                )));
            }
            let duplicate = list.insert_guid(guid.clone());
            if duplicate && key.truncation == Truncation::NotTruncated {
                // A caller can force a duplicate value into a record;
                // keep it, the search path deduplicates.
                let rendered = self.schema().ldif_write(&guid_attr, &guid);
                tracing::warn!(
                    dn = %record.dn,
                    attr,
                    value = %rendered,
                    "duplicate attribute value in index"
                );
            }
        } else {
            let linearized = Dn::parse(&record.dn)?.linearized();
            list.push(Bytes::from(linearized));
        }

        self.dn_list_store(&key.dn, list)
    }

    fn index_add_element_values(&mut self, record: &Record, el: &Element) -> CoreResult<()> {
        for value in &el.values {
            self.index_add_one(record, &el.name, el.flags, value)?;
        }
        Ok(())
    }

    /// Adds the DN index entry and every attribute index entry.
    pub(crate) fn index_add_all(&mut self, record: &Record) -> CoreResult<()> {
        self.write_index_dn_guid(record, true)?;

        if !self.catalog.has_attribute_indexes() {
            return Ok(());
        }
        for el in &record.elements {
            if !self.catalog.is_indexed(self.schema(), &el.name) {
                continue;
            }
            if let Err(e) = self.index_add_element_values(record, el) {
                self.set_error(format!("failed to index {} in {}: {e}", el.name, record.dn));
                return Err(e);
            }
        }
        Ok(())
    }

    /// Adds or removes a DN-valued pseudo-index entry (`@IDXONE`,
    /// `@IDXDN`) for a record.
    fn modify_index_dn(
        &mut self,
        record: &Record,
        dn: &Dn,
        index_attr: &str,
        add: bool,
    ) -> CoreResult<()> {
        let casefolded = dn.casefolded();
        if add {
            self.index_add_one(record, index_attr, 0, casefolded.as_bytes())
        } else {
            self.index_del_one(record, index_attr, casefolded.as_bytes())
        }
    }

    /// Maintains the one-level (parent) index entry for a record.
    pub(crate) fn index_onelevel(&mut self, record: &Record, add: bool) -> CoreResult<()> {
        if !self.catalog.one_level_indexes() {
            return Ok(());
        }
        let dn = Dn::parse(&record.dn)?;
        let Some(parent) = dn.parent() else {
            return Err(CoreError::operations(format!(
                "cannot derive a parent DN from {}",
                record.dn
            )));
        };
        self.modify_index_dn(record, &parent, IDXONE, add)
    }

    /// Maintains the DN to GUID index entry for a record (GUID mode).
    ///
    /// A duplicate here means the DN already exists, which surfaces as
    /// [`CoreError::EntryAlreadyExists`] at this boundary.
    pub(crate) fn write_index_dn_guid(&mut self, record: &Record, add: bool) -> CoreResult<()> {
        if !self.catalog.guid_mode() {
            return Ok(());
        }
        let dn = Dn::parse(&record.dn)?;
        match self.modify_index_dn(record, &dn, IDXDN, add) {
            Err(CoreError::ConstraintViolation { .. }) => {
                self.set_error(format!("Entry {} already exists", record.dn));
                Err(CoreError::EntryAlreadyExists {
                    dn: record.dn.clone(),
                })
            }
            other => other,
        }
    }

    /// Inserts every index entry for a fully-formed record: the DN
    /// index (GUID mode), all indexed attributes, and the one-level
    /// index.
    ///
    /// # Errors
    ///
    /// On failure the partially-written entries are removed again
    /// before the error propagates, so a failed add leaves no dangling
    /// index state behind.
    pub fn index_add_new(&mut self, record: &Record) -> CoreResult<()> {
        if Dn::parse(&record.dn)?.is_special() {
            return Ok(());
        }
        if let Err(e) = self.index_add_all(record) {
            let _ = self.index_delete(record);
            return Err(e);
        }
        if let Err(e) = self.index_onelevel(record, true) {
            let _ = self.index_delete(record);
            return Err(e);
        }
        Ok(())
    }

    /// Inserts index entries for one new element of a record. The
    /// caller guarantees these values are not indexed yet.
    ///
    /// # Errors
    ///
    /// Propagates uniqueness violations and storage failures.
    pub fn index_add_element(&mut self, record: &Record, el: &Element) -> CoreResult<()> {
        if Dn::parse(&record.dn)?.is_special() {
            return Ok(());
        }
        if !self.catalog.is_indexed(self.schema(), &el.name) {
            return Ok(());
        }
        self.index_add_element_values(record, el)
    }

    /// Removes one occurrence of this record from one index record.
    fn index_del_one(&mut self, record: &Record, attr: &str, value: &[u8]) -> CoreResult<()> {
        if record.dn.starts_with('@') {
            return Ok(());
        }

        let max_key_length = self.config().max_key_length;
        // Truncation is ignored on delete just as on add; multiple
        // values behind one truncated key are legitimate.
        let key = format_index_key(self.schema(), &self.catalog, max_key_length, attr, value)?;

        let mut list = match self.dn_list_load(&key.dn) {
            Ok(list) => list,
            // It wasn't indexed. Any earlier error is gone now.
            Err(CoreError::NoSuchObject) => return Ok(()),
            Err(e) => return Err(e),
        };

        let guid_mode = self.catalog.guid_mode();
        let needle: Bytes = if guid_mode {
            let guid_attr = self
                .catalog
                .guid_attr()
                .expect("guid_mode implies attr")
                .to_string();
            match record.first_value(&guid_attr) {
                Some(guid) => guid.clone(),
                None => return Ok(()),
            }
        } else {
            Bytes::from(Dn::parse(&record.dn)?.linearized())
        };

        let Some(position) = list.find(&needle, guid_mode) else {
            // Nothing to delete.
            return Ok(());
        };
        list.remove(position);
        self.dn_list_store(&key.dn, list)
    }

    /// Removes the index entry for one value of one element.
    ///
    /// # Errors
    ///
    /// Propagates storage failures; an already-absent entry is fine.
    pub fn index_del_value(
        &mut self,
        record: &Record,
        el: &Element,
        v_idx: usize,
    ) -> CoreResult<()> {
        let value = el.values.get(v_idx).ok_or_else(|| {
            CoreError::operations(format!(
                "value index {v_idx} out of range for element {}",
                el.name
            ))
        })?;
        self.index_del_one(record, &el.name, value)
    }

    /// Removes the index entries for every value of one element.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn index_del_element(&mut self, record: &Record, el: &Element) -> CoreResult<()> {
        if !self.catalog.has_attribute_indexes() {
            return Ok(());
        }
        if record.dn.starts_with('@') {
            return Ok(());
        }
        if !self.catalog.is_indexed(self.schema(), &el.name) {
            return Ok(());
        }
        for value in &el.values {
            self.index_del_one(record, &el.name, value)?;
        }
        Ok(())
    }

    /// Removes every index entry for a record: one-level first, then
    /// the DN index, then all indexed attributes.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn index_delete(&mut self, record: &Record) -> CoreResult<()> {
        if Dn::parse(&record.dn)?.is_special() {
            return Ok(());
        }
        self.index_onelevel(record, false)?;
        self.write_index_dn_guid(record, false)?;

        if !self.catalog.has_attribute_indexes() {
            return Ok(());
        }
        for el in &record.elements {
            self.index_del_element(record, el)?;
        }
        Ok(())
    }
}
