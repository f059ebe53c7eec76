//! # dirdb core
//!
//! The indexing core of a hierarchical directory database backed by an
//! ordered key/value store.
//!
//! Entries are identified by distinguished names (DNs) and queried by
//! attribute equality, by parent (one-level scope), or by base DN,
//! composed with boolean operators. This crate translates such queries
//! into candidate key sets over the backing store and keeps the index
//! records consistent across add, modify, and delete.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Database                         │
//! │  (handle: transactions, catalog, record keys)       │
//! └────────┬───────────────────────────────┬────────────┘
//!          │ search                        │ mutate
//! ┌────────▼────────────┐       ┌──────────▼────────────┐
//! │   query planner     │       │   mutation engine     │
//! │ (filter -> DN list) │       │ (add/delete entries)  │
//! └────────┬────────────┘       └──────────┬────────────┘
//!          │         index records         │
//! ┌────────▼───────────────────────────────▼────────────┐
//! │          write buffer / index record store          │
//! │   (staged per-transaction, drained at commit)       │
//! └────────────────────────┬────────────────────────────┘
//!                          │
//! ┌────────────────────────▼────────────────────────────┐
//! │              KvStore (dirdb_storage)                │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key invariants
//!
//! - An index record's version matches the database mode exactly; a
//!   mismatch is a hard error, never an auto-conversion.
//! - GUID-mode candidate lists are sorted 16-byte values at all times.
//! - The one-level index is authoritative for a parent's children; its
//!   lists are strict and are never widened by planner shortcuts.
//! - At most one non-truncated DN index match exists per DN.
//! - Within a transaction, the write buffer is the source of truth for
//!   every index key it has touched.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod catalog;
mod database;
mod dn;
mod error;
mod filter;
mod index;
mod schema;

pub use catalog::{Catalog, IDXATTR, IDXGUID, IDX_DN_GUID};
pub use database::{Config, Database};
pub use dn::Dn;
pub use error::{CoreError, CoreResult};
pub use filter::{Filter, Scope};
pub use index::{
    Flow, SearchDisposition, SearchRequest, GUID_INDEXING_VERSION, GUID_SIZE, IDX, IDXDN,
    IDXONE, IDXVERSION, INDEX, INDEXING_VERSION, INDEXLIST_DN,
};
pub use schema::{needs_base64, DirSchema, Schema, Syntax, ATTR_INDEXED, ATTR_UNIQUE_INDEX};

pub use dirdb_codec::{
    Element, Record, FLAG_ALLOW_DUPLICATE_VALUES, FLAG_FORCE_UNIQUE_INDEX,
};
