//! AssetVault Storage Layer
//!
//! Versioned SQLite store of named collections holding JSON records.
//! Schema changes happen only through migrations; every read and write runs
//! in a transaction scoped to the collections it touches.

mod database;
mod error;
mod key;
mod migrations;
mod registry;
mod schema;
mod transaction;

pub use database::{Database, DatabaseLocation};
pub use error::StorageError;
pub use key::Key;
pub use migrations::{schema_version, MigrationOutcome, MAX_VERSION, MigrationPlan, SchemaStep};
pub use registry::DatabaseRegistry;
pub use schema::{CollectionInfo, CollectionSpec, IndexSpec, Schema};
pub use transaction::{Transaction, TransactionMode};

pub type Result<T> = std::result::Result<T, StorageError>;
