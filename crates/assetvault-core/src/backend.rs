//! Asset backends
//!
//! A backend is anything that can hold assets by id. The coordinator talks
//! to every backend through [`AssetBackend`] and never sees how it stores
//! them.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use assetvault_assets::Asset;
use assetvault_storage::{Key, StorageError};

use crate::Result;

#[async_trait]
pub trait AssetBackend: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Store a new asset. An existing id is a `DuplicateKey` error.
    async fn put(&self, asset: &Asset) -> Result<()>;

    async fn get(&self, asset_id: &str) -> Result<Option<Asset>>;

    /// Removing an unknown id succeeds.
    async fn delete(&self, asset_id: &str) -> Result<()>;

    /// Asset ids in ascending order.
    async fn list_keys(&self) -> Result<Vec<String>>;
}

/// Process-local backend, for built-in assets and tests.
#[derive(Default)]
pub struct MemoryHelper {
    assets: Arc<RwLock<BTreeMap<String, Asset>>>,
}

impl MemoryHelper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with assets that ship with the application.
    pub fn with_assets(assets: impl IntoIterator<Item = Asset>) -> Self {
        let helper = Self::new();
        {
            let mut map = helper.assets.write();
            for asset in assets {
                map.insert(asset.asset_id.clone(), asset);
            }
        }
        helper
    }

    pub fn len(&self) -> usize {
        self.assets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.read().is_empty()
    }
}

impl Clone for MemoryHelper {
    fn clone(&self) -> Self {
        Self {
            assets: Arc::clone(&self.assets),
        }
    }
}

#[async_trait]
impl AssetBackend for MemoryHelper {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put(&self, asset: &Asset) -> Result<()> {
        let mut assets = self.assets.write();
        if assets.contains_key(&asset.asset_id) {
            return Err(StorageError::DuplicateKey {
                collection: self.name().to_string(),
                key: Key::from(&asset.asset_id),
            }
            .into());
        }
        assets.insert(asset.asset_id.clone(), asset.clone());
        Ok(())
    }

    async fn get(&self, asset_id: &str) -> Result<Option<Asset>> {
        Ok(self.assets.read().get(asset_id).cloned())
    }

    async fn delete(&self, asset_id: &str) -> Result<()> {
        self.assets.write().remove(asset_id);
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        Ok(self.assets.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assetvault_assets::{AssetType, DataFormat};

    #[tokio::test]
    async fn test_memory_helper_contract() {
        let helper = MemoryHelper::new();
        let asset = Asset::new(AssetType::Sound, "b", DataFormat::Wav, vec![1]);

        helper.put(&asset).await.unwrap();
        helper
            .put(&Asset::new(AssetType::Sound, "a", DataFormat::Mp3, vec![2]))
            .await
            .unwrap();

        let err = helper.put(&asset).await.unwrap_err();
        assert!(matches!(
            err.storage(),
            Some(StorageError::DuplicateKey { .. })
        ));

        assert_eq!(helper.get("b").await.unwrap(), Some(asset));
        assert_eq!(helper.list_keys().await.unwrap(), vec!["a", "b"]);

        helper.delete("b").await.unwrap();
        helper.delete("b").await.unwrap();
        assert_eq!(helper.len(), 1);
    }
}
