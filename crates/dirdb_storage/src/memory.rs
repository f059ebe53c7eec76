//! In-memory key/value backend.

use crate::error::{StorageError, StorageResult};
use crate::kv::{KvStore, Progress, WriteMode};
use parking_lot::RwLock;
use std::collections::BTreeMap;

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

/// An in-memory ordered key/value store.
///
/// Backed by a `BTreeMap`, so iteration order is raw byte order. A write
/// transaction snapshots the whole map on `begin` and restores it on
/// `cancel`; this is the reference semantics that persistent backends
/// must provide through their own journals.
///
/// Suitable for unit tests, integration tests, and ephemeral databases.
#[derive(Debug, Default)]
pub struct MemoryKv {
    data: RwLock<Map>,
    snapshot: RwLock<Option<Map>>,
}

impl MemoryKv {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the whole keyspace, for tests and debugging.
    #[must_use]
    pub fn dump(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.data
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Returns the number of records in the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl KvStore for MemoryKv {
    fn name(&self) -> &str {
        "memory"
    }

    fn fetch(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn store(&self, key: &[u8], value: &[u8], mode: WriteMode) -> StorageResult<()> {
        let mut data = self.data.write();
        if mode == WriteMode::Insert && data.contains_key(key) {
            return Err(StorageError::KeyExists);
        }
        data.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> StorageResult<()> {
        match self.data.write().remove(key) {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound),
        }
    }

    fn iterate(
        &self,
        visit: &mut dyn FnMut(&[u8], &[u8]) -> StorageResult<Progress>,
    ) -> StorageResult<()> {
        // Snapshot first so the callback can write without deadlocking
        // on the map lock or perturbing the traversal.
        let pairs: Vec<(Vec<u8>, Vec<u8>)> = self
            .data
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        for (key, value) in &pairs {
            match visit(key, value)? {
                Progress::Continue => {}
                Progress::Stop => break,
            }
        }
        Ok(())
    }

    fn update_in_iterate(
        &self,
        old_key: &[u8],
        new_key: &[u8],
        value: &[u8],
    ) -> StorageResult<()> {
        let mut data = self.data.write();
        data.remove(old_key);
        data.insert(new_key.to_vec(), value.to_vec());
        Ok(())
    }

    fn begin(&self) -> StorageResult<()> {
        let mut snapshot = self.snapshot.write();
        if snapshot.is_some() {
            return Err(StorageError::transaction("transaction already active"));
        }
        *snapshot = Some(self.data.read().clone());
        Ok(())
    }

    fn commit(&self) -> StorageResult<()> {
        match self.snapshot.write().take() {
            Some(_) => Ok(()),
            None => Err(StorageError::transaction("no transaction active")),
        }
    }

    fn cancel(&self) -> StorageResult<()> {
        match self.snapshot.write().take() {
            Some(saved) => {
                *self.data.write() = saved;
                Ok(())
            }
            None => Err(StorageError::transaction("no transaction active")),
        }
    }
}
