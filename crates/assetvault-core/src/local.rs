//! Persistent asset backend

use async_trait::async_trait;

use assetvault_assets::schema::{ASSET_TYPE_INDEX, SOUND_RECORDINGS};
use assetvault_assets::{Asset, AssetStore, AssetType, VmSound};
use assetvault_storage::{DatabaseRegistry, Key};

use crate::backend::AssetBackend;
use crate::config::Config;
use crate::Result;

/// Backend that keeps assets in a local database (`custom-assets` unless
/// configured otherwise).
#[derive(Clone)]
pub struct LocalStorageHelper {
    store: AssetStore,
}

impl LocalStorageHelper {
    pub fn new(store: AssetStore) -> Self {
        Self { store }
    }

    /// Open through the process-wide registry. Every helper opened this way
    /// shares one database handle.
    pub async fn open(config: &Config) -> Result<Self> {
        Self::open_with(DatabaseRegistry::global(), config).await
    }

    pub async fn open_with(registry: &DatabaseRegistry, config: &Config) -> Result<Self> {
        let store = AssetStore::open(registry, &config.database_name, config.location()).await?;
        Ok(Self::new(store))
    }

    pub fn store(&self) -> &AssetStore {
        &self.store
    }

    /// Every stored asset of one type, ordered by id.
    pub async fn load_by_type(&self, asset_type: AssetType) -> Result<Vec<Asset>> {
        Ok(self
            .store
            .get_all_by_index(SOUND_RECORDINGS, ASSET_TYPE_INDEX, asset_type.as_str())
            .await?)
    }

    pub async fn store_sound(&self, sound: &VmSound) -> Result<()> {
        self.store.save(sound).await?;
        Ok(())
    }

    pub async fn load_sound(&self, name: &str) -> Result<Option<VmSound>> {
        Ok(self.store.load(name).await?)
    }

    pub async fn delete_sound(&self, name: &str) -> Result<()> {
        Ok(self.store.remove::<VmSound>(name).await?)
    }

    pub async fn sound_names(&self) -> Result<Vec<String>> {
        let keys = self.store.list_keys(assetvault_assets::schema::VM_SOUNDS).await?;
        Ok(keys_to_strings(keys))
    }
}

#[async_trait]
impl AssetBackend for LocalStorageHelper {
    fn name(&self) -> &str {
        "local"
    }

    async fn put(&self, asset: &Asset) -> Result<()> {
        self.store.save(asset).await?;
        Ok(())
    }

    async fn get(&self, asset_id: &str) -> Result<Option<Asset>> {
        Ok(self.store.load(asset_id).await?)
    }

    async fn delete(&self, asset_id: &str) -> Result<()> {
        Ok(self.store.remove::<Asset>(asset_id).await?)
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let keys = self.store.list_keys(SOUND_RECORDINGS).await?;
        Ok(keys_to_strings(keys))
    }
}

fn keys_to_strings(keys: Vec<Key>) -> Vec<String> {
    keys.into_iter()
        .map(|key| match key {
            Key::Text(s) => s,
            Key::Int(i) => i.to_string(),
        })
        .collect()
}
