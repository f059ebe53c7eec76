//! Ordered key/value store contract.

use crate::error::StorageResult;

/// How a [`KvStore::store`] call treats an existing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Overwrite the value if the key exists, create it otherwise.
    Replace,
    /// Fail with [`crate::StorageError::KeyExists`] if the key exists.
    Insert,
}

/// Whether an iteration callback wants to keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Visit the next record.
    Continue,
    /// Stop the traversal without error.
    Stop,
}

/// An ordered key/value store holding opaque byte records.
///
/// This is the contract the directory core consumes. Backends store byte
/// keys against byte values and know nothing about records, DNs, or index
/// entries - all format interpretation happens above this trait.
///
/// # Invariants
///
/// - Keys are ordered by raw byte comparison; `iterate` visits them in
///   ascending order.
/// - At most one write transaction is active at a time. `cancel` restores
///   the byte-exact state from before `begin`.
/// - `iterate` traverses a point-in-time snapshot of the keyspace; the
///   callback may mutate the store (including via `update_in_iterate`)
///   without affecting the traversal.
///
/// # Implementors
///
/// - [`crate::MemoryKv`] - in-memory reference backend
pub trait KvStore: Send + Sync {
    /// Returns a short human-readable backend name for diagnostics.
    fn name(&self) -> &str;

    /// Fetches the value stored under `key`, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn fetch(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::KeyExists`] for
    /// [`WriteMode::Insert`] on a present key, or a backend error.
    fn store(&self, key: &[u8], value: &[u8], mode: WriteMode) -> StorageResult<()>;

    /// Deletes the record under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::NotFound`] if the key is absent.
    fn delete(&self, key: &[u8]) -> StorageResult<()>;

    /// Visits every record in ascending key order.
    ///
    /// The traversal runs over a snapshot taken when the call starts, so
    /// the callback is free to write back into the store.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by the callback.
    fn iterate(
        &self,
        visit: &mut dyn FnMut(&[u8], &[u8]) -> StorageResult<Progress>,
    ) -> StorageResult<()>;

    /// Renames a record from within an iteration callback.
    ///
    /// The record under `old_key` is removed and `value` is stored under
    /// `new_key` in one step. Because `iterate` walks a snapshot, the
    /// traversal itself is unaffected.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn update_in_iterate(
        &self,
        old_key: &[u8],
        new_key: &[u8],
        value: &[u8],
    ) -> StorageResult<()>;

    /// Starts a write transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if a transaction is already active.
    fn begin(&self) -> StorageResult<()>;

    /// Commits the active write transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if no transaction is active or the commit fails.
    fn commit(&self) -> StorageResult<()>;

    /// Cancels the active write transaction, restoring the exact state
    /// from before `begin`.
    ///
    /// # Errors
    ///
    /// Returns an error if no transaction is active.
    fn cancel(&self) -> StorageResult<()>;
}
