//! Error types for the directory core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors returned by directory core operations.
///
/// The taxonomy is deliberately small: logical absence and constraint
/// failures are routine outcomes that callers branch on, and everything
/// that indicates corruption, a version mismatch, or an internal
/// inconsistency collapses into [`CoreError::Operations`].
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] dirdb_storage::StorageError),

    /// Record codec error.
    #[error("codec error: {0}")]
    Codec(#[from] dirdb_codec::CodecError),

    /// The requested object does not exist. Routine, not a failure.
    #[error("no such object")]
    NoSuchObject,

    /// A uniqueness constraint was violated.
    #[error("constraint violation: {message}")]
    ConstraintViolation {
        /// Description of the violated constraint.
        message: String,
    },

    /// An add collided with an existing entry under the same DN.
    #[error("entry already exists: {dn}")]
    EntryAlreadyExists {
        /// The duplicated DN.
        dn: String,
    },

    /// The operation is refused in the current state (e.g. reindex of a
    /// read-only database).
    #[error("unwilling to perform: {message}")]
    UnwillingToPerform {
        /// Why the operation was refused.
        message: String,
    },

    /// Catch-all for corruption, version mismatch, and internal errors.
    #[error("operations error: {message}")]
    Operations {
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Creates a constraint violation error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            message: message.into(),
        }
    }

    /// Creates an unwilling-to-perform error.
    pub fn unwilling(message: impl Into<String>) -> Self {
        Self::UnwillingToPerform {
            message: message.into(),
        }
    }

    /// Creates an operations error.
    pub fn operations(message: impl Into<String>) -> Self {
        Self::Operations {
            message: message.into(),
        }
    }
}
