//! The database handle.
//!
//! A [`Database`] owns the backing store, the schema, the index
//! catalog, and - during a transaction - the index write buffer. It is
//! a single-writer, serially-invoked handle: the backing store provides
//! its own cross-process locking, and this core assumes calls arrive
//! one at a time.

use crate::catalog::Catalog;
use crate::dn::Dn;
use crate::error::{CoreError, CoreResult};
use crate::index::{WriteBuffer, GUID_SIZE, INDEXLIST_DN};
use crate::schema::Schema;
use dirdb_codec::{decode_record, encode_record, Record};
use dirdb_storage::{KvStore, StorageError, WriteMode};
use std::sync::Arc;

/// Policy knobs for a database handle.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum backing-store key length in bytes; 0 means unlimited.
    /// Keys that would exceed it are truncated and post-verified.
    pub max_key_length: usize,
    /// Refuse `(dn=...)` equality filters (they become empty matches).
    pub disallow_dn_filter: bool,
    /// Refuse every mutation, including reindex.
    pub read_only: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_key_length: 0,
            disallow_dn_filter: false,
            read_only: false,
        }
    }
}

/// Builds the backing key for a DN already in its stored string form.
pub(crate) fn dn_key_bytes(dn_str: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(3 + dn_str.len());
    key.extend_from_slice(b"DN=");
    key.extend_from_slice(dn_str.as_bytes());
    key
}

/// Builds the backing key for a GUID-keyed entry.
pub(crate) fn guid_key_bytes(guid: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(5 + guid.len());
    key.extend_from_slice(b"GUID=");
    key.extend_from_slice(guid);
    key
}

/// A handle onto one directory database.
pub struct Database {
    kv: Arc<dyn KvStore>,
    schema: Arc<dyn Schema>,
    config: Config,
    pub(crate) catalog: Catalog,
    pub(crate) buffer: Option<WriteBuffer>,
    guid_override: Option<(String, Option<String>)>,
    indexlist_override: Option<bool>,
    error_string: Option<String>,
}

impl Database {
    /// Opens a handle over a backing store, loading the index catalog.
    ///
    /// # Errors
    ///
    /// Fails if the `@INDEXLIST` control record cannot be read.
    pub fn open(
        kv: Arc<dyn KvStore>,
        schema: Arc<dyn Schema>,
        config: Config,
    ) -> CoreResult<Self> {
        let mut db = Self {
            kv,
            schema,
            config,
            catalog: Catalog::default(),
            buffer: None,
            guid_override: None,
            indexlist_override: None,
            error_string: None,
        };
        db.reload_catalog()?;
        Ok(db)
    }

    /// The handle's configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The index catalog currently in effect.
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub(crate) fn schema(&self) -> &dyn Schema {
        self.schema.as_ref()
    }

    pub(crate) fn kv(&self) -> Arc<dyn KvStore> {
        Arc::clone(&self.kv)
    }

    /// The diagnostic string attached by the last failing operation.
    #[must_use]
    pub fn error_string(&self) -> Option<&str> {
        self.error_string.as_deref()
    }

    pub(crate) fn set_error(&mut self, message: impl Into<String>) {
        self.error_string = Some(message.into());
    }

    /// Supplies the GUID index configuration out-of-band, instead of
    /// `@IDXGUID` / `@IDX_DN_GUID` on `@INDEXLIST`.
    ///
    /// Must be called before the first transaction.
    ///
    /// # Errors
    ///
    /// Fails if the catalog cannot be rebuilt.
    pub fn set_override_guid_index(
        &mut self,
        attr: &str,
        dn_component: Option<&str>,
    ) -> CoreResult<()> {
        self.guid_override = Some((attr.to_string(), dn_component.map(str::to_string)));
        self.reload_catalog()
    }

    /// Replaces the `@INDEXLIST` record entirely: indexed-ness comes
    /// from schema flags and the control record is never consulted.
    ///
    /// Must be called before the first transaction; combine with
    /// [`Database::set_override_guid_index`] for GUID mode.
    ///
    /// # Errors
    ///
    /// Fails if the catalog cannot be rebuilt.
    pub fn set_override_indexlist(&mut self, one_level_indexes: bool) -> CoreResult<()> {
        self.indexlist_override = Some(one_level_indexes);
        self.reload_catalog()
    }

    /// Re-reads the index catalog (`@INDEXLIST` or the overrides).
    pub(crate) fn reload_catalog(&mut self) -> CoreResult<()> {
        if let Some(one_level) = self.indexlist_override {
            let (guid_attr, dn_component) = match &self.guid_override {
                Some((attr, component)) => (Some(attr.clone()), component.clone()),
                None => (None, None),
            };
            self.catalog = Catalog::from_overrides(one_level, guid_attr, dn_component);
            return Ok(());
        }

        let indexlist = self.fetch_record_by_key(&dn_key_bytes(INDEXLIST_DN))?;
        self.catalog = Catalog::from_record(indexlist.as_ref());
        if let Some((attr, component)) = &self.guid_override {
            self.catalog.set_guid_index(attr.clone(), component.clone());
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Backing keys
    // ------------------------------------------------------------------

    /// The backing key for a DN-keyed lookup of `dn`.
    pub(crate) fn key_for_dn(&self, dn: &Dn) -> Vec<u8> {
        dn_key_bytes(&dn.casefolded())
    }

    /// Computes the backing key a record must be stored under in the
    /// current mode: `GUID=<16 bytes>` for ordinary entries in GUID
    /// mode, `DN=<casefolded DN>` otherwise. Special `@` records are
    /// always DN-keyed.
    ///
    /// # Errors
    ///
    /// In GUID mode, fails if the record lacks a well-formed GUID value.
    pub fn key_for_record(&self, record: &Record) -> CoreResult<Vec<u8>> {
        let dn = Dn::parse(&record.dn)?;
        if self.catalog.guid_mode() && !dn.is_special() {
            let attr = self.catalog.guid_attr().expect("guid_mode implies attr");
            let guid = record.first_value(attr).ok_or_else(|| {
                CoreError::operations(format!(
                    "record {} has no value for GUID attribute '{attr}'",
                    record.dn
                ))
            })?;
            if guid.len() != GUID_SIZE {
                return Err(CoreError::operations(format!(
                    "GUID value on {} has length {}, expected {GUID_SIZE}",
                    record.dn,
                    guid.len()
                )));
            }
            return Ok(guid_key_bytes(guid));
        }
        Ok(self.key_for_dn(&dn))
    }

    /// Translates one `@IDX` value into the backing key it points at.
    pub(crate) fn idx_to_key(&self, idx_value: &[u8]) -> CoreResult<Vec<u8>> {
        if self.catalog.guid_mode() {
            if idx_value.len() != GUID_SIZE {
                return Err(CoreError::operations(format!(
                    "index value has length {}, expected {GUID_SIZE}",
                    idx_value.len()
                )));
            }
            return Ok(guid_key_bytes(idx_value));
        }
        let dn_str = std::str::from_utf8(idx_value)
            .map_err(|_| CoreError::operations("index value is not a valid DN string"))?;
        let dn = Dn::parse(dn_str)?;
        Ok(self.key_for_dn(&dn))
    }

    // ------------------------------------------------------------------
    // Record I/O
    // ------------------------------------------------------------------

    /// Fetches and unpacks the record stored under a backing key.
    ///
    /// # Errors
    ///
    /// Fails on storage errors or if the stored bytes do not unpack.
    pub fn fetch_record_by_key(&self, key: &[u8]) -> CoreResult<Option<Record>> {
        match self.kv.fetch(key)? {
            Some(bytes) => Ok(Some(decode_record(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Stores an entry record under its backing key, replacing any
    /// previous version. Indexing is separate: callers pair this with
    /// [`Database::index_add_new`].
    ///
    /// # Errors
    ///
    /// Fails if the handle is read-only or the store rejects the write.
    pub fn put_record(&mut self, record: &Record) -> CoreResult<()> {
        self.ensure_writable()?;
        let key = self.key_for_record(record)?;
        let value = encode_record(record)?;
        self.kv.store(&key, &value, WriteMode::Replace)?;
        Ok(())
    }

    /// Removes an entry record from the backing store. Index entries
    /// are removed separately via [`Database::index_delete`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NoSuchObject`] if the record is absent.
    pub fn delete_record(&mut self, record: &Record) -> CoreResult<()> {
        self.ensure_writable()?;
        let key = self.key_for_record(record)?;
        match self.kv.delete(&key) {
            Ok(()) => Ok(()),
            Err(StorageError::NotFound) => Err(CoreError::NoSuchObject),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn ensure_writable(&self) -> CoreResult<()> {
        if self.config.read_only {
            return Err(CoreError::unwilling("database is read-only"));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// True while a transaction is open on this handle.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.buffer.is_some()
    }

    /// Starts a transaction: begins one on the backing store, allocates
    /// the index write buffer, and re-reads the index catalog (which is
    /// then treated as immutable until commit or cancel).
    ///
    /// # Errors
    ///
    /// Fails if a transaction is already active.
    pub fn transaction_start(&mut self) -> CoreResult<()> {
        if self.buffer.is_some() {
            return Err(CoreError::operations("transaction already active"));
        }
        self.kv.begin()?;
        self.buffer = Some(WriteBuffer::new());
        self.reload_catalog()?;
        Ok(())
    }

    /// Commits: drains every staged index record to the backing store,
    /// then commits the store transaction. The first staging error
    /// aborts the whole transaction.
    ///
    /// # Errors
    ///
    /// Propagates the first error from the flush or the commit.
    pub fn transaction_commit(&mut self) -> CoreResult<()> {
        let Some(mut buffer) = self.buffer.take() else {
            return Err(CoreError::operations("no transaction active"));
        };
        self.error_string = None;

        for (index_dn, list) in buffer.drain_sorted() {
            if let Err(e) = self.dn_list_store_full(&index_dn, &list) {
                let _ = self.kv.cancel();
                self.set_error(format!(
                    "failed to store index records in transaction commit: {e}"
                ));
                return Err(e);
            }
        }

        self.kv.commit()?;
        Ok(())
    }

    /// Cancels: discards the write buffer and rolls the backing store
    /// back to its pre-transaction state. A no-op without a
    /// transaction.
    ///
    /// # Errors
    ///
    /// Propagates a backing-store rollback failure.
    pub fn transaction_cancel(&mut self) -> CoreResult<()> {
        if self.buffer.take().is_none() {
            return Ok(());
        }
        self.kv.cancel()?;
        Ok(())
    }
}
