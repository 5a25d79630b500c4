//! Error types for `EventVault`.
//!
//! Registries are strict about write conflicts and lenient about misses:
//!
//! - **OptimisticConcurrency**: a read model write carried a stale expected
//!   version. Re-read the document and retry the projection.
//! - Deleting something that does not exist is *not* an error; the registry
//!   reports a zero count instead.
//! - Malformed filter patterns never surface here; they simply match nothing.
//!
//! Backends that sit on top of files or other engines wrap their own failures
//! into the variants below so callers see one uniform contract.

use crate::types::{ReadModelId, ReadModelTypeName};
use thiserror::Error;

/// Errors returned by event and read model registries.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The stored read model version did not match the writer's expectation.
    #[error(
        "optimistic concurrency violation on {type_name} '{id}': expected stored version {expected}, found {current:?}"
    )]
    OptimisticConcurrency {
        /// Read model type of the rejected write
        type_name: ReadModelTypeName,
        /// Read model id of the rejected write
        id: ReadModelId,
        /// Version the writer expected to replace
        expected: u64,
        /// Version actually stored, `None` if no document exists
        current: Option<u64>,
    },

    /// The read model value is unusable, e.g. it has no string `id`.
    #[error("invalid read model: {0}")]
    InvalidReadModel(String),

    /// A stored record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The backing storage reported an I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal state could not be accessed, e.g. a poisoned lock.
    #[error("{operation} operation failed")]
    StoreFailure {
        /// Registry operation that failed
        operation: &'static str,
    },

    /// Invalid registry configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl RegistryError {
    /// Returns true for failures a caller should resolve by re-reading and retrying.
    pub const fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::OptimisticConcurrency { .. })
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// Result alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_errors_are_flagged_as_retryable() {
        let error = RegistryError::OptimisticConcurrency {
            type_name: ReadModelTypeName::try_new("User").unwrap(),
            id: ReadModelId::try_new("u1").unwrap(),
            expected: 1,
            current: Some(2),
        };
        assert!(error.is_concurrency_conflict());
        assert!(error.to_string().contains("User 'u1'"));
        assert!(!RegistryError::StoreFailure { operation: "store" }.is_concurrency_conflict());
    }
}
