//! AssetVault Assets
//!
//! Asset and sound records stored in the `custom-assets` database, and the
//! async [`AssetStore`] used to read and write them.

mod asset;
pub mod schema;
mod store;

pub use asset::{Asset, AssetType, DataFormat, Record, VmSound};
pub use store::AssetStore;

pub use assetvault_storage::{Key, StorageError};

pub type Result<T> = std::result::Result<T, StorageError>;
