//! AssetVault Core
//!
//! Coordination layer: configuration, logging, and the [`AssetStorage`]
//! front end that routes asset loads and stores across backends.

mod backend;
mod config;
mod error;
mod local;
mod storage;

pub use backend::{AssetBackend, MemoryHelper};
pub use config::{Config, DATA_DIR_ENV};
pub use error::CoreError;
pub use local::LocalStorageHelper;
pub use storage::AssetStorage;

// Re-export core components
pub use assetvault_assets::{schema, Asset, AssetStore, AssetType, DataFormat, Record, VmSound};
pub use assetvault_storage::{
    Database, DatabaseLocation, DatabaseRegistry, Key, MigrationOutcome, MigrationPlan,
    SchemaStep, StorageError,
};

pub type Result<T> = std::result::Result<T, CoreError>;

/// Initialize logging
pub fn init_logging(config: &Config) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    fmt().with_env_filter(filter).with_target(true).init();
}
