//! Database handle and transaction runners

use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::StorageError;
use crate::migrations::{run_migrations, MigrationOutcome, MigrationPlan};
use crate::schema::Schema;
use crate::transaction::{Transaction, TransactionMode};
use crate::Result;

/// Where a database lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DatabaseLocation {
    Memory,
    /// A directory holding `<name>.sqlite3`
    Directory(PathBuf),
}

impl DatabaseLocation {
    pub fn path_for(&self, name: &str) -> Option<PathBuf> {
        match self {
            DatabaseLocation::Memory => None,
            DatabaseLocation::Directory(dir) => Some(dir.join(format!("{name}.sqlite3"))),
        }
    }
}

/// An open, migrated database. Clones share the same connection.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    schema: Arc<Schema>,
    name: Arc<str>,
    location: DatabaseLocation,
    outcome: Arc<MigrationOutcome>,
}

impl Database {
    /// Open (creating if needed) and migrate up to `version`.
    pub fn open(
        name: &str,
        location: &DatabaseLocation,
        version: u32,
        plan: &MigrationPlan,
    ) -> Result<Self> {
        validate_name(name)?;

        let mut conn = match location.path_for(name) {
            Some(path) => open_file(&path)?,
            None => Connection::open_in_memory()?,
        };

        let outcome = run_migrations(&mut conn, name, version, plan)?;
        let schema = Schema::load(&conn)?;

        tracing::info!(
            database = %name,
            version = outcome.to_version,
            collections = ?schema.collection_names(),
            "Opened database"
        );

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            schema: Arc::new(schema),
            name: Arc::from(name),
            location: location.clone(),
            outcome: Arc::new(outcome),
        })
    }

    pub fn open_in_memory(name: &str, version: u32, plan: &MigrationPlan) -> Result<Self> {
        Self::open(name, &DatabaseLocation::Memory, version, plan)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.outcome.to_version
    }

    pub fn location(&self) -> &DatabaseLocation {
        &self.location
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// What the open that produced this handle did to the schema.
    pub fn migration_outcome(&self) -> &MigrationOutcome {
        &self.outcome
    }

    /// Whether both handles share one underlying connection.
    pub fn same_handle(&self, other: &Database) -> bool {
        Arc::ptr_eq(&self.conn, &other.conn)
    }

    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run `f` in a transaction over `scope`. Commits if `f` succeeds,
    /// otherwise aborts before returning the error.
    pub fn transaction<F, T>(&self, scope: &[&str], mode: TransactionMode, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let mut tx = Transaction::begin(&mut conn, &self.schema, scope, mode)?;

        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = tx.abort() {
                    tracing::error!(
                        database = %self.name,
                        "Failed to abort transaction: {}",
                        rollback
                    );
                }
                tracing::warn!(
                    database = %self.name,
                    scope = ?scope,
                    "Transaction aborted: {}",
                    e
                );
                Err(e)
            }
        }
    }

    /// Async form of [`Database::transaction`]; the blocking work runs on
    /// tokio's blocking pool.
    pub async fn run<F, T>(&self, scope: Vec<String>, mode: TransactionMode, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || {
            let scope: Vec<&str> = scope.iter().map(String::as_str).collect();
            db.transaction(&scope, mode, f)
        })
        .await?
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            schema: Arc::clone(&self.schema),
            name: Arc::clone(&self.name),
            location: self.location.clone(),
            outcome: Arc::clone(&self.outcome),
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("version", &self.version())
            .field("location", &self.location)
            .finish()
    }
}

fn open_file(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;

    // WAL mode for better concurrent performance
    let _: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;

    Ok(conn)
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}
