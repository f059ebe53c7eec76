//! Scope indices: the one-level index and base-DN translation.

use crate::database::Database;
use crate::dn::Dn;
use crate::error::{CoreError, CoreResult};
use crate::index::{format_index_key, DnList, Truncation, IDXDN, IDXONE};
use bytes::Bytes;

impl Database {
    /// Loads the index record keyed by a DN-valued pseudo-attribute
    /// (`@IDXONE` or `@IDXDN`).
    fn index_dn_attr(&mut self, attr: &str, dn: &Dn) -> CoreResult<(DnList, Truncation)> {
        let casefolded = dn.casefolded();
        let max_key_length = self.config().max_key_length;
        let key = format_index_key(
            self.schema(),
            &self.catalog,
            max_key_length,
            attr,
            casefolded.as_bytes(),
        )?;
        let list = self.dn_list_load(&key.dn)?;
        if list.is_empty() {
            return Err(CoreError::NoSuchObject);
        }
        Ok((list, key.truncation))
    }

    /// The direct children of `parent`, from the one-level index.
    ///
    /// The result is strict: the index is authoritative for the set of
    /// children (when its key was not truncated), so no intersection
    /// shortcut may ever widen it.
    pub(crate) fn index_dn_one(&mut self, parent: &Dn) -> CoreResult<(DnList, Truncation)> {
        let (mut list, truncation) = self.index_dn_attr(IDXONE, parent)?;
        list.set_strict(true);
        Ok((list, truncation))
    }

    /// Translates a base DN into a candidate list.
    ///
    /// DN-keyed mode needs no lookup: the DN is the key. GUID mode
    /// first tries the GUID extended component on the DN itself, then
    /// falls back to the `@IDXDN` index.
    pub(crate) fn index_dn_base(&mut self, base: &Dn) -> CoreResult<(DnList, Truncation)> {
        if !self.catalog.guid_mode() {
            let list = DnList::from_values(vec![Bytes::from(base.linearized())]);
            return Ok((list, Truncation::NotTruncated));
        }

        if let Some(component) = self.catalog.guid_dn_component() {
            if let Some(guid) = base.extended_component(component) {
                let list = DnList::from_values(vec![guid.clone()]);
                return Ok((list, Truncation::NotTruncated));
            }
        }

        self.index_dn_attr(IDXDN, base)
    }

    /// Resolves a DN to its backing-store key.
    ///
    /// Exactly one non-truncated match may exist per DN; two constitute
    /// a uniqueness violation. Under truncation the candidates share a
    /// key, so each record is fetched and its DN compared; a record
    /// vanishing mid-scan is tolerated.
    ///
    /// # Errors
    ///
    /// [`CoreError::NoSuchObject`] if the DN is not present,
    /// [`CoreError::ConstraintViolation`] on a duplicated DN index.
    pub fn key_dn_from_idx(&mut self, dn: &Dn) -> CoreResult<Vec<u8>> {
        let (list, truncation) = self.index_dn_base(dn)?;
        if list.is_empty() {
            return Err(CoreError::NoSuchObject);
        }

        if list.len() > 1 && truncation == Truncation::NotTruncated {
            let message = format!(
                "failed to read DN index for {}: too many values ({} > 1)",
                dn.linearized(),
                list.len()
            );
            self.set_error(message.clone());
            return Err(CoreError::constraint(message));
        }

        let mut index = 0;
        if truncation == Truncation::Truncated {
            let mut found = None;
            for (i, value) in list.values().iter().enumerate() {
                let key = self.idx_to_key(value)?;
                let Some(record) = self.fetch_record_by_key(&key)? else {
                    // The record has disappeared? Yes, this can happen.
                    continue;
                };
                if Dn::parse(&record.dn)? == *dn {
                    found = Some(i);
                    break;
                }
            }
            // We matched the index but the DN we wanted was not there.
            let Some(i) = found else {
                return Err(CoreError::NoSuchObject);
            };
            index = i;
        }

        self.idx_to_key(&list.values()[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Config;
    use crate::schema::DirSchema;
    use dirdb_storage::MemoryKv;
    use std::sync::Arc;

    fn open(guid: bool) -> Database {
        let mut db = Database::open(
            Arc::new(MemoryKv::new()),
            Arc::new(DirSchema::new()),
            Config::default(),
        )
        .unwrap();
        if guid {
            db.set_override_indexlist(true).unwrap();
            db.set_override_guid_index("objectGUID", Some("GUID")).unwrap();
        }
        db
    }

    #[test]
    fn base_lookup_in_dn_mode_is_the_dn_itself() {
        let mut db = open(false);
        let dn = Dn::parse("CN=Alice,O=X").unwrap();
        let (list, truncation) = db.index_dn_base(&dn).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list.values()[0].as_ref(), b"CN=Alice,O=X");
        assert_eq!(truncation, Truncation::NotTruncated);

        let key = db.key_dn_from_idx(&dn).unwrap();
        assert_eq!(key, b"DN=CN=ALICE,O=X".to_vec());
    }

    #[test]
    fn guid_extended_component_short_circuits() {
        let mut db = open(true);
        let dn = Dn::parse("<GUID=0653d856-1f14-4c13-a3e9-4f3f3f3f3f3f>;CN=A,O=X").unwrap();
        let (list, _) = db.index_dn_base(&dn).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list.values()[0].len(), 16);

        let key = db.key_dn_from_idx(&dn).unwrap();
        assert_eq!(&key[..5], b"GUID=");
    }

    #[test]
    fn missing_dn_index_is_no_such_object() {
        let mut db = open(true);
        let dn = Dn::parse("CN=Nobody,O=X").unwrap();
        assert!(matches!(
            db.key_dn_from_idx(&dn),
            Err(CoreError::NoSuchObject)
        ));
    }

    #[test]
    fn one_level_lists_are_strict() {
        let mut db = open(false);
        let parent = Dn::parse("O=X").unwrap();
        let mut staged = DnList::new();
        staged.push(Bytes::from("CN=A,O=X"));
        db.dn_list_store("@INDEX:@IDXONE:O=X", staged).unwrap();

        let (list, truncation) = db.index_dn_one(&parent).unwrap();
        assert!(list.strict());
        assert_eq!(list.len(), 1);
        assert_eq!(truncation, Truncation::NotTruncated);
    }

    #[test]
    fn empty_one_level_is_no_such_object() {
        let mut db = open(false);
        let parent = Dn::parse("O=Empty").unwrap();
        assert!(matches!(
            db.index_dn_one(&parent),
            Err(CoreError::NoSuchObject)
        ));
    }
}
