//! Asset store
//!
//! Async CRUD over the collections of an open [`Database`]. Every call runs
//! in its own transaction scoped to the one collection it touches, so writes
//! to different collections are not atomic with each other.

use assetvault_storage::{
    Database, DatabaseLocation, DatabaseRegistry, Key, StorageError, Transaction, TransactionMode,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::asset::Record;
use crate::schema::{migration_plan, SCHEMA_VERSION};
use crate::Result;

#[derive(Clone)]
pub struct AssetStore {
    db: Database,
}

impl AssetStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Open the shared asset database `name` through `registry`, migrating
    /// it to the current schema on first use.
    pub async fn open(
        registry: &DatabaseRegistry,
        name: &str,
        location: DatabaseLocation,
    ) -> Result<Self> {
        let db = registry
            .open(name, location, SCHEMA_VERSION, migration_plan())
            .await?;
        Ok(Self::new(db))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Insert a record. Fails with `DuplicateKey` if its key is taken.
    pub async fn put<R: Serialize>(&self, collection: &str, record: &R) -> Result<Key> {
        let doc = to_document(collection, record)?;
        let name = collection.to_string();
        let key = self.write(collection, move |tx| tx.insert(&name, doc)).await?;

        tracing::debug!(collection = %collection, key = %key, "Stored record");
        Ok(key)
    }

    /// Insert a record or replace the one with the same key.
    pub async fn upsert<R: Serialize>(&self, collection: &str, record: &R) -> Result<Key> {
        let doc = to_document(collection, record)?;
        let name = collection.to_string();
        let key = self.write(collection, move |tx| tx.upsert(&name, doc)).await?;

        tracing::debug!(collection = %collection, key = %key, "Replaced record");
        Ok(key)
    }

    /// Insert every record in one transaction; one failure stores none.
    pub async fn put_all<R: Serialize>(&self, collection: &str, records: &[R]) -> Result<Vec<Key>> {
        let docs = records
            .iter()
            .map(|r| to_document(collection, r))
            .collect::<Result<Vec<_>>>()?;
        let name = collection.to_string();

        let keys = self
            .write(collection, move |tx| {
                docs.into_iter()
                    .map(|doc| tx.insert(&name, doc))
                    .collect::<Result<Vec<_>>>()
            })
            .await?;

        tracing::debug!(collection = %collection, count = keys.len(), "Stored records");
        Ok(keys)
    }

    /// `Ok(None)` when no record has this key.
    pub async fn get<R: DeserializeOwned>(
        &self,
        collection: &str,
        key: impl Into<Key>,
    ) -> Result<Option<R>> {
        let key = key.into();
        let name = collection.to_string();
        let doc = self.read(collection, move |tx| tx.get(&name, &key)).await?;
        from_document(collection, doc)
    }

    /// First record, in key order, whose `index` field equals `value`.
    pub async fn get_by_index<R: DeserializeOwned>(
        &self,
        collection: &str,
        index: &str,
        value: impl Into<Key>,
    ) -> Result<Option<R>> {
        let value = value.into();
        let name = collection.to_string();
        let index = index.to_string();
        let doc = self
            .read(collection, move |tx| tx.get_by_index(&name, &index, &value))
            .await?;
        from_document(collection, doc)
    }

    pub async fn get_all_by_index<R: DeserializeOwned>(
        &self,
        collection: &str,
        index: &str,
        value: impl Into<Key>,
    ) -> Result<Vec<R>> {
        let value = value.into();
        let name = collection.to_string();
        let index = index.to_string();
        let docs = self
            .read(collection, move |tx| tx.get_all_by_index(&name, &index, &value))
            .await?;

        docs.into_iter()
            .map(|doc| {
                serde_json::from_value(doc)
                    .map_err(|e| StorageError::from(e).into_read_error(collection))
            })
            .collect()
    }

    /// Deleting a missing key succeeds and changes nothing.
    pub async fn delete(&self, collection: &str, key: impl Into<Key>) -> Result<()> {
        let key = key.into();
        let name = collection.to_string();
        let removed = {
            let key = key.clone();
            self.write(collection, move |tx| tx.delete(&name, &key)).await?
        };

        tracing::debug!(collection = %collection, key = %key, removed, "Deleted record");
        Ok(())
    }

    /// Every primary key, in natural key order.
    pub async fn list_keys(&self, collection: &str) -> Result<Vec<Key>> {
        let name = collection.to_string();
        self.read(collection, move |tx| tx.keys(&name)).await
    }

    pub async fn count(&self, collection: &str) -> Result<u64> {
        let name = collection.to_string();
        self.read(collection, move |tx| tx.count(&name)).await
    }

    pub async fn save<R: Record>(&self, record: &R) -> Result<Key> {
        self.put(R::COLLECTION, record).await
    }

    pub async fn save_or_replace<R: Record>(&self, record: &R) -> Result<Key> {
        self.upsert(R::COLLECTION, record).await
    }

    pub async fn load<R: Record>(&self, key: impl Into<Key>) -> Result<Option<R>> {
        self.get(R::COLLECTION, key).await
    }

    pub async fn remove<R: Record>(&self, key: impl Into<Key>) -> Result<()> {
        self.delete(R::COLLECTION, key).await
    }

    async fn read<F, T>(&self, collection: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.db
            .run(vec![collection.to_string()], TransactionMode::ReadOnly, f)
            .await
            .map_err(|e| e.into_read_error(collection))
    }

    async fn write<F, T>(&self, collection: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.db
            .run(vec![collection.to_string()], TransactionMode::ReadWrite, f)
            .await
            .map_err(|e| e.into_write_error(collection))
    }
}

fn to_document<R: Serialize>(collection: &str, record: &R) -> Result<Value> {
    serde_json::to_value(record).map_err(|e| StorageError::InvalidRecord {
        collection: collection.to_string(),
        reason: e.to_string(),
    })
}

fn from_document<R: DeserializeOwned>(collection: &str, doc: Option<Value>) -> Result<Option<R>> {
    doc.map(serde_json::from_value)
        .transpose()
        .map_err(|e| StorageError::from(e).into_read_error(collection))
}
