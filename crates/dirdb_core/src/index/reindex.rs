//! Full index rebuild.

use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::index::{DnList, WriteBuffer};
use dirdb_codec::decode_record;
use dirdb_storage::{KvStore, Progress};

impl Database {
    /// Rebuilds every index record from the entries themselves.
    ///
    /// Three passes over the backing store, all inside the current
    /// transaction: wipe the old index records (staged, so the store
    /// itself is untouched until commit), re-key any entry whose
    /// backing key no longer matches the current mode (e.g. after a
    /// switch from DN to GUID keying or a casefold rule change), then
    /// re-insert the one-level and attribute index entries for every
    /// record. The staged index state drains to the store at commit.
    ///
    /// # Errors
    ///
    /// Refused on a read-only database or outside a transaction. A
    /// record with a missing DN is a hard error.
    pub fn reindex(&mut self) -> CoreResult<()> {
        // Only triggered after a modification, but make clear we do not
        // re-index a read-only database.
        if self.config().read_only {
            return Err(CoreError::unwilling(
                "refusing to reindex a read-only database",
            ));
        }
        if self.buffer.is_none() {
            return Err(CoreError::unwilling("reindex requires an active transaction"));
        }

        self.reload_catalog()?;

        // Staged values from before the reindex would shadow the wipe;
        // start over with a fresh buffer.
        self.buffer = Some(WriteBuffer::new());

        let kv = self.kv();

        // Pass 1: stage an empty list for every index record. Nothing
        // touches the store yet; at commit this usually becomes an
        // in-place update of the old record rather than churn.
        let mut failure: Option<CoreError> = None;
        kv.iterate(&mut |key, _value| {
            if !key.starts_with(b"DN=@INDEX:") {
                return Ok(Progress::Continue);
            }
            let index_dn = match std::str::from_utf8(&key[3..]) {
                Ok(dn) => dn,
                Err(_) => {
                    failure = Some(CoreError::operations("index record key is not valid UTF-8"));
                    return Ok(Progress::Stop);
                }
            };
            if let Err(e) = self.dn_list_store(index_dn, DnList::new()) {
                failure = Some(e);
                return Ok(Progress::Stop);
            }
            Ok(Progress::Continue)
        })?;
        if let Some(e) = failure {
            self.set_error(format!("index deletion pass failed: {e}"));
            return Err(e);
        }

        // Pass 2: re-key entries whose backing key changed under the
        // current mode.
        let mut failure: Option<CoreError> = None;
        let mut count = 0u64;
        kv.iterate(&mut |key, value| {
            if key.starts_with(b"DN=@") {
                return Ok(Progress::Continue);
            }
            if !is_record_key(key) {
                return Ok(Progress::Continue);
            }

            let record = match decode_record(value) {
                Ok(record) => record,
                Err(e) => {
                    failure = Some(e.into());
                    return Ok(Progress::Stop);
                }
            };
            if record.dn.is_empty() {
                tracing::error!(?key, "refusing to re-key a record with no DN");
                failure = Some(CoreError::operations("record with no DN in re-key pass"));
                return Ok(Progress::Stop);
            }

            let new_key = match self.key_for_record(&record) {
                Ok(new_key) => new_key,
                Err(e) => {
                    failure = Some(e);
                    return Ok(Progress::Stop);
                }
            };
            if new_key.as_slice() != key {
                if let Err(e) = kv.update_in_iterate(key, &new_key, value) {
                    failure = Some(e.into());
                    return Ok(Progress::Stop);
                }
            }

            count += 1;
            if count % 10_000 == 0 {
                tracing::info!(count, "reindexing: re-keyed records so far");
            }
            Ok(Progress::Continue)
        })?;
        if let Some(e) = failure {
            self.set_error(format!("re-key pass failed: {e}"));
            return Err(e);
        }

        // Pass 3: re-insert the one-level and attribute index entries
        // for every record.
        let mut failure: Option<CoreError> = None;
        let mut count = 0u64;
        kv.iterate(&mut |key, value| {
            if key.starts_with(b"DN=@") {
                return Ok(Progress::Continue);
            }
            if !is_record_key(key) {
                return Ok(Progress::Continue);
            }

            let record = match decode_record(value) {
                Ok(record) => record,
                Err(e) => {
                    failure = Some(e.into());
                    return Ok(Progress::Stop);
                }
            };
            if record.dn.is_empty() {
                tracing::error!(?key, "refusing to re-index a record with no DN");
                failure = Some(CoreError::operations("record with no DN in re-index pass"));
                return Ok(Progress::Stop);
            }

            if let Err(e) = self.index_onelevel(&record, true) {
                tracing::error!(dn = %record.dn, "adding the one-level index entry failed");
                failure = Some(e);
                return Ok(Progress::Stop);
            }
            if let Err(e) = self.index_add_all(&record) {
                failure = Some(e);
                return Ok(Progress::Stop);
            }

            count += 1;
            if count % 10_000 == 0 {
                tracing::info!(count, "reindexing: re-indexed records so far");
            }
            Ok(Progress::Continue)
        })?;
        if let Some(e) = failure {
            self.set_error(format!("reindexing failed: {e}"));
            return Err(e);
        }

        if count > 10_000 {
            tracing::info!(
                count,
                backend = kv.name(),
                "reindex successful; final index write-out happens at transaction commit"
            );
        }
        Ok(())
    }
}

/// Entry records live under `DN=` or `GUID=` keys; anything else in the
/// store belongs to the backend.
fn is_record_key(key: &[u8]) -> bool {
    key.starts_with(b"DN=") || key.starts_with(b"GUID=")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Config;
    use crate::schema::DirSchema;
    use dirdb_storage::MemoryKv;
    use std::sync::Arc;

    #[test]
    fn reindex_requires_a_transaction() {
        let mut db = Database::open(
            Arc::new(MemoryKv::new()),
            Arc::new(DirSchema::new()),
            Config::default(),
        )
        .unwrap();
        assert!(matches!(
            db.reindex(),
            Err(CoreError::UnwillingToPerform { .. })
        ));
    }

    #[test]
    fn reindex_refuses_read_only() {
        let mut db = Database::open(
            Arc::new(MemoryKv::new()),
            Arc::new(DirSchema::new()),
            Config {
                read_only: true,
                ..Config::default()
            },
        )
        .unwrap();
        assert!(matches!(
            db.reindex(),
            Err(CoreError::UnwillingToPerform { .. })
        ));
    }
}
