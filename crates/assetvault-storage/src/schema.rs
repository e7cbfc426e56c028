//! Collection and index catalog
//!
//! Every collection is a `"store:<name>"` table holding `(key, value)` rows,
//! where `value` is the JSON document. Secondary indexes are SQLite
//! expression indexes over `json_extract(value, '$.<key_path>')`. The catalog
//! tables `_collections` and `_indexes` record what has been declared.

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::StorageError;
use crate::Result;

const CATALOG: &str = r#"
    CREATE TABLE IF NOT EXISTS _collections (
        name TEXT PRIMARY KEY,
        key_path TEXT NOT NULL,
        auto_increment INTEGER NOT NULL DEFAULT 0,
        next_key INTEGER NOT NULL DEFAULT 1
    );

    CREATE TABLE IF NOT EXISTS _indexes (
        collection TEXT NOT NULL,
        name TEXT NOT NULL,
        key_path TEXT NOT NULL,
        is_unique INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (collection, name)
    );
"#;

/// Declaration of a collection: its name and primary key path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    pub key_path: String,
    /// Generate integer keys for records that do not carry one
    pub auto_increment: bool,
}

impl CollectionSpec {
    pub fn new(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
            auto_increment: false,
        }
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }
}

/// Declaration of a secondary index over one top-level field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub key_path: String,
    pub unique: bool,
}

impl IndexSpec {
    pub fn new(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    pub spec: CollectionSpec,
    pub indexes: BTreeMap<String, IndexSpec>,
}

/// Snapshot of the catalog, taken once the database has been migrated.
/// Outside of a migration the catalog never changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    collections: BTreeMap<String, CollectionInfo>,
}

impl Schema {
    pub fn load(conn: &Connection) -> Result<Self> {
        if !catalog_exists(conn)? {
            return Ok(Self::default());
        }

        let mut collections = BTreeMap::new();

        let mut stmt = conn.prepare("SELECT name, key_path, auto_increment FROM _collections")?;
        let rows = stmt.query_map([], |row| {
            Ok(CollectionSpec {
                name: row.get(0)?,
                key_path: row.get(1)?,
                auto_increment: row.get::<_, i64>(2)? != 0,
            })
        })?;
        for spec in rows {
            let spec = spec?;
            collections.insert(
                spec.name.clone(),
                CollectionInfo {
                    spec,
                    indexes: BTreeMap::new(),
                },
            );
        }

        let mut stmt = conn.prepare("SELECT collection, name, key_path, is_unique FROM _indexes")?;
        let rows = stmt.query_map([], |row| {
            let collection: String = row.get(0)?;
            let index = IndexSpec {
                name: row.get(1)?,
                key_path: row.get(2)?,
                unique: row.get::<_, i64>(3)? != 0,
            };
            Ok((collection, index))
        })?;
        for row in rows {
            let (collection, index) = row?;
            if let Some(info) = collections.get_mut(&collection) {
                info.indexes.insert(index.name.clone(), index);
            }
        }

        Ok(Self { collections })
    }

    pub fn collection(&self, name: &str) -> Result<&CollectionInfo> {
        self.collections
            .get(name)
            .ok_or_else(|| StorageError::CollectionNotFound(name.to_string()))
    }

    pub fn index(&self, collection: &str, index: &str) -> Result<&IndexSpec> {
        self.collection(collection)?
            .indexes
            .get(index)
            .ok_or_else(|| StorageError::IndexNotFound {
                collection: collection.to_string(),
                index: index.to_string(),
            })
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.collections.keys().cloned().collect()
    }

    pub fn contains(&self, collection: &str) -> bool {
        self.collections.contains_key(collection)
    }
}

pub(crate) fn ensure_catalog(conn: &Connection) -> Result<()> {
    conn.execute_batch(CATALOG)?;
    Ok(())
}

fn catalog_exists(conn: &Connection) -> Result<bool> {
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = '_collections'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Create a collection. Returns `false` when an identical collection already
/// exists.
pub(crate) fn create_collection(conn: &Connection, spec: &CollectionSpec) -> Result<bool> {
    if spec.name.is_empty() {
        return Err(StorageError::SchemaConflict(
            "collection name cannot be empty".to_string(),
        ));
    }
    validate_key_path(&spec.key_path)?;

    let existing: Option<(String, i64)> = conn
        .query_row(
            "SELECT key_path, auto_increment FROM _collections WHERE name = ?1",
            [&spec.name],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    if let Some((key_path, auto_increment)) = existing {
        if key_path != spec.key_path || (auto_increment != 0) != spec.auto_increment {
            return Err(StorageError::SchemaConflict(format!(
                "collection '{}' already exists with key path '{}'",
                spec.name, key_path
            )));
        }
        return Ok(false);
    }

    conn.execute(
        "INSERT INTO _collections (name, key_path, auto_increment) VALUES (?1, ?2, ?3)",
        rusqlite::params![spec.name, spec.key_path, spec.auto_increment as i64],
    )?;
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (key NOT NULL PRIMARY KEY, value TEXT NOT NULL) WITHOUT ROWID;",
        table_name(&spec.name)
    ))?;

    Ok(true)
}

/// Create a secondary index. Returns `false` when an identical index already
/// exists.
pub(crate) fn create_index(conn: &Connection, collection: &str, spec: &IndexSpec) -> Result<bool> {
    validate_key_path(&spec.key_path)?;

    let known: Option<String> = conn
        .query_row(
            "SELECT name FROM _collections WHERE name = ?1",
            [collection],
            |row| row.get(0),
        )
        .optional()?;
    if known.is_none() {
        return Err(StorageError::CollectionNotFound(collection.to_string()));
    }

    let existing: Option<(String, i64)> = conn
        .query_row(
            "SELECT key_path, is_unique FROM _indexes WHERE collection = ?1 AND name = ?2",
            [collection, spec.name.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    if let Some((key_path, is_unique)) = existing {
        if key_path != spec.key_path || (is_unique != 0) != spec.unique {
            return Err(StorageError::SchemaConflict(format!(
                "index '{}' on '{}' already exists with key path '{}'",
                spec.name, collection, key_path
            )));
        }
        return Ok(false);
    }

    conn.execute(
        "INSERT INTO _indexes (collection, name, key_path, is_unique) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![collection, spec.name, spec.key_path, spec.unique as i64],
    )?;
    conn.execute_batch(&format!(
        "CREATE {unique}INDEX IF NOT EXISTS {index} ON {table} ({expr});",
        unique = if spec.unique { "UNIQUE " } else { "" },
        index = quote_ident(&format!("index:{}:{}", collection, spec.name)),
        table = table_name(collection),
        expr = field_expr(&spec.key_path),
    ))?;

    Ok(true)
}

pub(crate) fn table_name(collection: &str) -> String {
    quote_ident(&format!("store:{collection}"))
}

/// SQL expression reading a top-level field out of the stored document.
/// Index creation and index lookups must produce the same text.
pub(crate) fn field_expr(key_path: &str) -> String {
    format!("json_extract(value, '$.{key_path}')")
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

// Key paths end up inside SQL text, so only plain field names are accepted.
fn validate_key_path(key_path: &str) -> Result<()> {
    let mut chars = key_path.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(StorageError::SchemaConflict(format!(
            "invalid key path '{key_path}'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        ensure_catalog(&conn).unwrap();
        conn
    }

    #[test]
    fn test_create_collection_is_idempotent() {
        let conn = catalog();
        let spec = CollectionSpec::new("vmSounds", "name");

        assert!(create_collection(&conn, &spec).unwrap());
        assert!(!create_collection(&conn, &spec).unwrap());

        let schema = Schema::load(&conn).unwrap();
        assert_eq!(schema.collection("vmSounds").unwrap().spec, spec);
    }

    #[test]
    fn test_key_path_is_immutable() {
        let conn = catalog();
        create_collection(&conn, &CollectionSpec::new("vmSounds", "name")).unwrap();

        let err = create_collection(&conn, &CollectionSpec::new("vmSounds", "id")).unwrap_err();
        assert!(matches!(err, StorageError::SchemaConflict(_)));
    }

    #[test]
    fn test_index_requires_collection() {
        let conn = catalog();
        let err = create_index(&conn, "missing", &IndexSpec::new("by_type", "assetType"))
            .unwrap_err();
        assert!(matches!(err, StorageError::CollectionNotFound(_)));
    }

    #[test]
    fn test_index_roundtrip_through_catalog() {
        let conn = catalog();
        create_collection(&conn, &CollectionSpec::new("sound-recordings", "assetId")).unwrap();
        let index = IndexSpec::new("assetType", "assetType");
        assert!(create_index(&conn, "sound-recordings", &index).unwrap());
        assert!(!create_index(&conn, "sound-recordings", &index).unwrap());

        let schema = Schema::load(&conn).unwrap();
        assert_eq!(schema.index("sound-recordings", "assetType").unwrap(), &index);
        assert!(matches!(
            schema.index("sound-recordings", "md5"),
            Err(StorageError::IndexNotFound { .. })
        ));
    }

    #[test]
    fn test_rejects_unsafe_key_path() {
        let conn = catalog();
        let spec = CollectionSpec::new("evil", "x') --");
        assert!(matches!(
            create_collection(&conn, &spec),
            Err(StorageError::SchemaConflict(_))
        ));
    }

    #[test]
    fn test_schema_of_fresh_database_is_empty() {
        let conn = Connection::open_in_memory().unwrap();
        let schema = Schema::load(&conn).unwrap();
        assert!(schema.collection_names().is_empty());
    }
}
