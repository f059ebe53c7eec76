//! Loading and storing index records.
//!
//! All index reads and writes funnel through here. During a transaction
//! the write buffer is consulted first and writes are staged; outside a
//! transaction everything goes straight to the backing store.

use crate::database::{dn_key_bytes, Database};
use crate::error::{CoreError, CoreResult};
use crate::index::{
    DnList, GUID_INDEXING_VERSION, GUID_SIZE, IDX, IDXVERSION, INDEXING_VERSION,
};
use bytes::BytesMut;
use dirdb_codec::{encode_record, Element, Record};
use dirdb_storage::{KvStore, StorageError, WriteMode};

impl Database {
    /// Materializes the list stored under an index DN.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NoSuchObject`] if no such index record
    /// exists (and nothing is staged), or an operations error if the
    /// record's version does not match the database mode or its payload
    /// is malformed.
    pub(crate) fn dn_list_load(&mut self, index_dn: &str) -> CoreResult<DnList> {
        if let Some(buffer) = &self.buffer {
            if let Some(staged) = buffer.get(index_dn) {
                // Values are shared slices, so this copy is shallow.
                return Ok(staged.clone());
            }
        }

        let Some(record) = self.fetch_record_by_key(&dn_key_bytes(index_dn))? else {
            return Err(CoreError::NoSuchObject);
        };

        let Some(el) = record.find_element(IDX) else {
            return Ok(DnList::new());
        };

        let version = record
            .first_value(IDXVERSION)
            .and_then(|v| std::str::from_utf8(v).ok()?.parse::<u32>().ok())
            .unwrap_or(0);

        if !self.catalog.guid_mode() {
            if version != INDEXING_VERSION {
                tracing::error!(
                    index_dn,
                    version,
                    expected = INDEXING_VERSION,
                    "wrong DN index version"
                );
                self.set_error(format!(
                    "wrong DN index version {version}, expected {INDEXING_VERSION} for {index_dn}"
                ));
                return Err(CoreError::operations("index version mismatch"));
            }
            return Ok(DnList::from_values(el.values.clone()));
        }

        if version != GUID_INDEXING_VERSION {
            // Quite likely on first startup after switching to the GUID
            // index; the database needs a reindex.
            tracing::error!(
                index_dn,
                version,
                expected = GUID_INDEXING_VERSION,
                "wrong GUID index version"
            );
            self.set_error(format!(
                "wrong GUID index version {version}, expected {GUID_INDEXING_VERSION} for {index_dn}"
            ));
            return Err(CoreError::operations("index version mismatch"));
        }

        let packed = el
            .values
            .first()
            .ok_or_else(|| CoreError::operations(format!("empty {IDX} payload on {index_dn}")))?;
        if packed.len() % GUID_SIZE != 0 {
            return Err(CoreError::operations(format!(
                "{IDX} payload on {index_dn} has length {} which is not a multiple of {GUID_SIZE}",
                packed.len()
            )));
        }

        let values = (0..packed.len() / GUID_SIZE)
            .map(|i| packed.slice(i * GUID_SIZE..(i + 1) * GUID_SIZE))
            .collect();
        Ok(DnList::from_values(values))
    }

    /// Stores a list under an index DN: staged when a transaction is
    /// open, written through otherwise.
    pub(crate) fn dn_list_store(&mut self, index_dn: &str, list: DnList) -> CoreResult<()> {
        match &mut self.buffer {
            Some(buffer) => {
                buffer.stage(index_dn.to_string(), list);
                Ok(())
            }
            None => self.dn_list_store_full(index_dn, &list),
        }
    }

    /// Writes a list to the backing store as a full index record.
    ///
    /// An empty list deletes the record; deleting an absent record is
    /// not an error.
    pub(crate) fn dn_list_store_full(&mut self, index_dn: &str, list: &DnList) -> CoreResult<()> {
        self.ensure_writable()?;
        let key = dn_key_bytes(index_dn);

        if list.is_empty() {
            return match self.kv().delete(&key) {
                Ok(()) | Err(StorageError::NotFound) => Ok(()),
                Err(e) => Err(e.into()),
            };
        }

        let (version, idx_element) = if self.catalog.guid_mode() {
            let mut packed = BytesMut::with_capacity(list.len() * GUID_SIZE);
            for value in list.values() {
                if value.len() != GUID_SIZE {
                    return Err(CoreError::operations(format!(
                        "index value under {index_dn} has length {}, expected {GUID_SIZE}",
                        value.len()
                    )));
                }
                packed.extend_from_slice(value);
            }
            (
                GUID_INDEXING_VERSION,
                Element::new(IDX, vec![packed.freeze()]),
            )
        } else {
            (
                INDEXING_VERSION,
                Element::new(IDX, list.values().to_vec()),
            )
        };

        let record = Record::new(index_dn)
            .with_element(Element::single(IDXVERSION, version.to_string()))
            .with_element(idx_element);
        self.kv()
            .store(&key, &encode_record(&record)?, WriteMode::Replace)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Config;
    use crate::schema::DirSchema;
    use bytes::Bytes;
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
            db.set_override_indexlist(false).unwrap();
            db.set_override_guid_index("objectGUID", None).unwrap();
        }
        db
    }

    fn one_entry_list(value: &[u8]) -> DnList {
        DnList::from_values(vec![Bytes::copy_from_slice(value)])
    }

    #[test]
    fn absent_record_is_no_such_object() {
        let mut db = open(false);
        assert!(matches!(
            db.dn_list_load("@INDEX:CN:NOPE"),
            Err(CoreError::NoSuchObject)
        ));
    }

    #[test]
    fn write_through_roundtrip_in_dn_mode() {
        let mut db = open(false);
        db.dn_list_store("@INDEX:CN:ALICE", one_entry_list(b"CN=Alice,O=X"))
            .unwrap();
        let list = db.dn_list_load("@INDEX:CN:ALICE").unwrap();
        assert_eq!(list.values()[0].as_ref(), b"CN=Alice,O=X");
    }

    #[test]
    fn guid_mode_packs_and_slices() {
        let mut db = open(true);
        let mut list = DnList::new();
        list.insert_guid(Bytes::copy_from_slice(&[9u8; 16]));
        list.insert_guid(Bytes::copy_from_slice(&[2u8; 16]));
        db.dn_list_store("@INDEX:CN:ALICE", list).unwrap();

        let loaded = db.dn_list_load("@INDEX:CN:ALICE").unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.values()[0].as_ref(), &[2u8; 16]);
        assert_eq!(loaded.values()[1].as_ref(), &[9u8; 16]);
    }

    #[test]
    fn version_mismatch_is_fatal() {
        let mut db = open(false);
        db.dn_list_store("@INDEX:CN:ALICE", one_entry_list(b"CN=Alice,O=X"))
            .unwrap();

        // Reopen the same store in GUID mode: version 2 records must be
        // rejected, not converted.
        let mut guid_db = open(true);
        let raw = db.kv().fetch(b"DN=@INDEX:CN:ALICE").unwrap().unwrap();
        guid_db
            .kv()
            .store(b"DN=@INDEX:CN:ALICE", &raw, WriteMode::Replace)
            .unwrap();
        let err = guid_db.dn_list_load("@INDEX:CN:ALICE").unwrap_err();
        assert!(matches!(err, CoreError::Operations { .. }));
        assert!(guid_db.error_string().unwrap().contains("version"));
    }

    #[test]
    fn empty_store_deletes_the_record() {
        let mut db = open(false);
        db.dn_list_store("@INDEX:CN:ALICE", one_entry_list(b"CN=Alice,O=X"))
            .unwrap();
        db.dn_list_store("@INDEX:CN:ALICE", DnList::new()).unwrap();
        assert!(db.kv().fetch(b"DN=@INDEX:CN:ALICE").unwrap().is_none());
        // Deleting the already-deleted record is tolerated.
        db.dn_list_store("@INDEX:CN:ALICE", DnList::new()).unwrap();
    }

    #[test]
    fn transaction_stages_instead_of_writing() {
        let mut db = open(false);
        db.transaction_start().unwrap();
        db.dn_list_store("@INDEX:CN:ALICE", one_entry_list(b"CN=Alice,O=X"))
            .unwrap();

        // Nothing on disk yet, but reads see the staged list.
        assert!(db.kv().fetch(b"DN=@INDEX:CN:ALICE").unwrap().is_none());
        assert_eq!(db.dn_list_load("@INDEX:CN:ALICE").unwrap().len(), 1);

        db.transaction_commit().unwrap();
        assert!(db.kv().fetch(b"DN=@INDEX:CN:ALICE").unwrap().is_some());
    }
}
