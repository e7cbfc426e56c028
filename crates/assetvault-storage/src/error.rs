//! Storage error types

use thiserror::Error;

use crate::key::Key;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Migration of '{name}' from v{from_version} to v{to_version} failed: {cause}")]
    Migration {
        name: String,
        from_version: u32,
        to_version: u32,
        #[source]
        cause: Box<StorageError>,
    },

    #[error("Database '{name}' is at v{stored}, cannot open at older v{requested}")]
    VersionConflict {
        name: String,
        stored: u32,
        requested: u32,
    },

    #[error("Invalid database name: {0}")]
    InvalidName(String),

    #[error("Invalid schema version: {0}")]
    InvalidVersion(u32),

    #[error("Stored schema version {0} is out of range")]
    CorruptVersion(i64),

    #[error("Database '{name}' is already open at v{version}")]
    AlreadyOpen { name: String, version: u32 },

    #[error("Schema conflict: {0}")]
    SchemaConflict(String),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Index '{index}' not found on collection '{collection}'")]
    IndexNotFound { collection: String, index: String },

    #[error("Key {key} already exists in '{collection}'")]
    DuplicateKey { collection: String, key: Key },

    #[error("Invalid record for '{collection}': {reason}")]
    InvalidRecord { collection: String, reason: String },

    #[error("Collection '{0}' is not in the transaction scope")]
    NotInScope(String),

    #[error("Write attempted on '{0}' inside a read-only transaction")]
    ReadOnlyTransaction(String),

    #[error("Write to '{collection}' failed: {cause}")]
    StoreWrite {
        collection: String,
        #[source]
        cause: Box<StorageError>,
    },

    #[error("Read from '{collection}' failed: {cause}")]
    StoreRead {
        collection: String,
        #[source]
        cause: Box<StorageError>,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl StorageError {
    /// Whether this error came from the engine rather than from the caller's
    /// input or the declared schema.
    pub fn is_engine_fault(&self) -> bool {
        matches!(
            self,
            StorageError::Sqlite(_)
                | StorageError::Json(_)
                | StorageError::Io(_)
                | StorageError::Task(_)
        )
    }

    pub(crate) fn migration(name: &str, from_version: u32, to_version: u32, cause: Self) -> Self {
        StorageError::Migration {
            name: name.to_string(),
            from_version,
            to_version,
            cause: Box::new(cause),
        }
    }

    /// Wrap engine faults raised while writing to `collection`.
    pub fn into_write_error(self, collection: &str) -> Self {
        if self.is_engine_fault() {
            StorageError::StoreWrite {
                collection: collection.to_string(),
                cause: Box::new(self),
            }
        } else {
            self
        }
    }

    /// Wrap engine faults raised while reading from `collection`.
    pub fn into_read_error(self, collection: &str) -> Self {
        if self.is_engine_fault() {
            StorageError::StoreRead {
                collection: collection.to_string(),
                cause: Box::new(self),
            }
        } else {
            self
        }
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(err: tokio::task::JoinError) -> Self {
        StorageError::Task(err.to_string())
    }
}
