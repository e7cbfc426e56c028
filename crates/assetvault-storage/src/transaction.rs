//! Collection-scoped transactions

use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use serde_json::Value;

use crate::error::StorageError;
use crate::key::Key;
use crate::schema::{field_expr, table_name, CollectionInfo, Schema};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

/// A transaction over a declared set of collections.
///
/// Dropping a transaction without calling [`Transaction::commit`] rolls it
/// back; the database handle always calls [`Transaction::abort`] explicitly
/// when the body fails.
pub struct Transaction<'a> {
    tx: rusqlite::Transaction<'a>,
    schema: &'a Schema,
    scope: Vec<String>,
    mode: TransactionMode,
}

impl<'a> Transaction<'a> {
    pub(crate) fn begin(
        conn: &'a mut Connection,
        schema: &'a Schema,
        scope: &[&str],
        mode: TransactionMode,
    ) -> Result<Self> {
        for collection in scope {
            schema.collection(collection)?;
        }

        let behavior = match mode {
            TransactionMode::ReadOnly => TransactionBehavior::Deferred,
            TransactionMode::ReadWrite => TransactionBehavior::Immediate,
        };
        let tx = conn.transaction_with_behavior(behavior)?;

        Ok(Self {
            tx,
            schema,
            scope: scope.iter().map(|s| s.to_string()).collect(),
            mode,
        })
    }

    pub fn get(&self, collection: &str, key: &Key) -> Result<Option<Value>> {
        self.collection(collection, false)?;

        let raw: Option<String> = self
            .tx
            .query_row(
                &format!("SELECT value FROM {} WHERE key = ?1", table_name(collection)),
                [key],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|s| serde_json::from_str(&s).map_err(StorageError::from))
            .transpose()
    }

    pub fn contains(&self, collection: &str, key: &Key) -> Result<bool> {
        self.collection(collection, false)?;

        let found: Option<i64> = self
            .tx
            .query_row(
                &format!("SELECT 1 FROM {} WHERE key = ?1", table_name(collection)),
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// First record, in key order, whose indexed field equals `value`.
    pub fn get_by_index(&self, collection: &str, index: &str, value: &Key) -> Result<Option<Value>> {
        Ok(self
            .query_index(collection, index, value, Some(1))?
            .into_iter()
            .next())
    }

    /// Every record whose indexed field equals `value`, in key order.
    pub fn get_all_by_index(&self, collection: &str, index: &str, value: &Key) -> Result<Vec<Value>> {
        self.query_index(collection, index, value, None)
    }

    fn query_index(
        &self,
        collection: &str,
        index: &str,
        value: &Key,
        limit: Option<u32>,
    ) -> Result<Vec<Value>> {
        self.collection(collection, false)?;
        let index = self.schema.index(collection, index)?;

        let mut sql = format!(
            "SELECT value FROM {} WHERE {} = ?1 ORDER BY key",
            table_name(collection),
            field_expr(&index.key_path)
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = self.tx.prepare(&sql)?;
        let rows = stmt.query_map([value], |row| row.get::<_, String>(0))?;

        let mut records = Vec::new();
        for raw in rows {
            records.push(serde_json::from_str(&raw?)?);
        }
        Ok(records)
    }

    /// All primary keys in natural key order.
    pub fn keys(&self, collection: &str) -> Result<Vec<Key>> {
        self.collection(collection, false)?;

        let mut stmt = self
            .tx
            .prepare(&format!("SELECT key FROM {} ORDER BY key", table_name(collection)))?;
        let keys = stmt
            .query_map([], |row| row.get::<_, Key>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    pub fn count(&self, collection: &str) -> Result<u64> {
        self.collection(collection, false)?;

        let count: i64 = self.tx.query_row(
            &format!("SELECT COUNT(*) FROM {}", table_name(collection)),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Insert a new record. Fails with `DuplicateKey` if its key is taken.
    pub fn insert(&mut self, collection: &str, mut record: Value) -> Result<Key> {
        let info = self.collection(collection, true)?;
        let key = self.resolve_key(info, &mut record)?;

        if self.contains(collection, &key)? {
            return Err(StorageError::DuplicateKey {
                collection: collection.to_string(),
                key,
            });
        }

        self.tx.execute(
            &format!(
                "INSERT INTO {} (key, value) VALUES (?1, ?2)",
                table_name(collection)
            ),
            rusqlite::params![key, serde_json::to_string(&record)?],
        )?;
        Ok(key)
    }

    /// Insert a record or replace the one stored under the same key.
    pub fn upsert(&mut self, collection: &str, mut record: Value) -> Result<Key> {
        let info = self.collection(collection, true)?;
        let key = self.resolve_key(info, &mut record)?;

        // Only a primary key conflict turns into an update; unique index
        // violations still fail the write.
        self.tx.execute(
            &format!(
                "INSERT INTO {} (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                table_name(collection)
            ),
            rusqlite::params![key, serde_json::to_string(&record)?],
        )?;
        Ok(key)
    }

    /// Delete by key. Returns whether a record was removed.
    pub fn delete(&mut self, collection: &str, key: &Key) -> Result<bool> {
        self.collection(collection, true)?;

        let removed = self.tx.execute(
            &format!("DELETE FROM {} WHERE key = ?1", table_name(collection)),
            [key],
        )?;
        Ok(removed > 0)
    }

    pub fn commit(self) -> Result<()> {
        self.tx.commit()?;
        Ok(())
    }

    /// Roll back every write made through this transaction.
    pub fn abort(self) -> Result<()> {
        self.tx.rollback()?;
        Ok(())
    }

    fn collection(&self, collection: &str, write: bool) -> Result<&'a CollectionInfo> {
        if !self.scope.iter().any(|c| c == collection) {
            return Err(StorageError::NotInScope(collection.to_string()));
        }
        if write && self.mode == TransactionMode::ReadOnly {
            return Err(StorageError::ReadOnlyTransaction(collection.to_string()));
        }
        self.schema.collection(collection)
    }

    fn resolve_key(&self, info: &CollectionInfo, record: &mut Value) -> Result<Key> {
        let collection = &info.spec.name;
        let key_path = &info.spec.key_path;
        let invalid = |reason: String| StorageError::InvalidRecord {
            collection: collection.clone(),
            reason,
        };

        let fields = record
            .as_object_mut()
            .ok_or_else(|| invalid("record must be a JSON object".to_string()))?;

        let declared = fields.get(key_path).filter(|v| !v.is_null()).cloned();
        match declared {
            Some(value) => {
                let key = Key::from_json(&value).ok_or_else(|| {
                    invalid(format!("key '{key_path}' must be an integer or a string"))
                })?;
                if info.spec.auto_increment {
                    if let Key::Int(i) = key {
                        self.tx.execute(
                            "UPDATE _collections SET next_key = MAX(next_key, ?1 + 1) WHERE name = ?2",
                            rusqlite::params![i, collection],
                        )?;
                    }
                }
                Ok(key)
            }
            None if info.spec.auto_increment => {
                let next: i64 = self.tx.query_row(
                    "SELECT next_key FROM _collections WHERE name = ?1",
                    [collection],
                    |row| row.get(0),
                )?;
                self.tx.execute(
                    "UPDATE _collections SET next_key = ?1 WHERE name = ?2",
                    rusqlite::params![next + 1, collection],
                )?;
                fields.insert(key_path.clone(), Value::from(next));
                Ok(Key::Int(next))
            }
            None => Err(invalid(format!("missing key '{key_path}'"))),
        }
    }
}
