//! Error types for storage backends.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested key does not exist.
    #[error("key not found")]
    NotFound,

    /// An insert-only store found the key already present.
    #[error("key already exists")]
    KeyExists,

    /// A write was attempted outside a transaction on a backend that
    /// requires one, or transaction state was otherwise inconsistent.
    #[error("transaction state error: {message}")]
    Transaction {
        /// Description of the inconsistency.
        message: String,
    },

    /// The store contents could not be interpreted.
    #[error("corrupt store: {message}")]
    Corrupt {
        /// Description of the corruption.
        message: String,
    },

    /// I/O error from a persistent backend.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StorageError {
    /// Creates a transaction state error.
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Creates a corrupt store error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }
}
