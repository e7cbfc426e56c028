//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] assetvault_storage::StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No storage backend configured")]
    NoBackend,
}

impl CoreError {
    /// The storage error underneath, if any.
    pub fn storage(&self) -> Option<&assetvault_storage::StorageError> {
        match self {
            CoreError::Storage(e) => Some(e),
            _ => None,
        }
    }
}
