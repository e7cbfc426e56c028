//! Asset storage coordinator
//!
//! Holds an ordered list of backends. Loads try each backend in turn; stores
//! go to the first (primary) backend.

use std::sync::Arc;

use assetvault_assets::{Asset, AssetType, DataFormat};

use crate::backend::AssetBackend;
use crate::config::Config;
use crate::error::CoreError;
use crate::local::LocalStorageHelper;
use crate::Result;

pub struct AssetStorage {
    backends: Vec<Arc<dyn AssetBackend>>,
}

impl AssetStorage {
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
        }
    }

    /// Storage backed by the local database described by `config`.
    pub async fn open(config: &Config) -> Result<Self> {
        let local = LocalStorageHelper::open(config).await?;
        Ok(Self::new().with_backend(Arc::new(local)))
    }

    /// Append a backend. Earlier backends are consulted first.
    pub fn with_backend(mut self, backend: Arc<dyn AssetBackend>) -> Self {
        tracing::debug!(backend = backend.name(), "Added asset backend");
        self.backends.push(backend);
        self
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    /// Find an asset of the given type and format. A backend holding the id
    /// under a different type or format is skipped.
    pub async fn load(
        &self,
        asset_type: AssetType,
        asset_id: &str,
        data_format: Option<DataFormat>,
    ) -> Result<Option<Asset>> {
        let data_format = data_format.unwrap_or_else(|| asset_type.default_format());

        for backend in &self.backends {
            match backend.get(asset_id).await? {
                Some(asset) if asset.asset_type == asset_type && asset.data_format == data_format => {
                    tracing::debug!(
                        backend = backend.name(),
                        asset_id = %asset_id,
                        "Loaded asset"
                    );
                    return Ok(Some(asset));
                }
                Some(asset) => {
                    tracing::debug!(
                        backend = backend.name(),
                        asset_id = %asset_id,
                        found_type = %asset.asset_type,
                        found_format = %asset.data_format,
                        "Skipped asset with different type or format"
                    );
                }
                None => {}
            }
        }

        Ok(None)
    }

    /// Find an asset by id alone, whatever its type.
    pub async fn load_by_asset_id(&self, asset_id: &str) -> Result<Option<Asset>> {
        for backend in &self.backends {
            if let Some(asset) = backend.get(asset_id).await? {
                return Ok(Some(asset));
            }
        }
        Ok(None)
    }

    /// Build an asset and write it to the primary backend.
    pub async fn store(
        &self,
        asset_type: AssetType,
        data_format: Option<DataFormat>,
        data: Vec<u8>,
        asset_id: &str,
    ) -> Result<Asset> {
        let primary = self.backends.first().ok_or(CoreError::NoBackend)?;
        let data_format = data_format.unwrap_or_else(|| asset_type.default_format());
        let asset = Asset::new(asset_type, asset_id, data_format, data);

        primary.put(&asset).await?;
        tracing::info!(
            backend = primary.name(),
            asset_id = %asset_id,
            asset_type = %asset_type,
            "Stored asset"
        );

        Ok(asset)
    }

    /// Remove the id from every backend.
    pub async fn delete(&self, asset_id: &str) -> Result<()> {
        for backend in &self.backends {
            backend.delete(asset_id).await?;
        }
        Ok(())
    }

    /// Ids held by the primary backend.
    pub async fn list_keys(&self) -> Result<Vec<String>> {
        let primary = self.backends.first().ok_or(CoreError::NoBackend)?;
        primary.list_keys().await
    }
}

impl Default for AssetStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for AssetStorage {
    fn clone(&self) -> Self {
        Self {
            backends: self.backends.clone(),
        }
    }
}
