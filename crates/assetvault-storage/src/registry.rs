//! Process-wide database handles
//!
//! Each database name and location maps to a single lazily-initialized
//! [`Database`]. The same name in two directories is two databases.
//! Concurrent first opens wait on the same initialization, so a database is
//! opened and migrated at most once per registry. A failed open leaves the
//! slot empty and the next caller tries again.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::OnceCell;

use crate::database::{Database, DatabaseLocation};
use crate::error::StorageError;
use crate::migrations::MigrationPlan;
use crate::Result;

#[derive(Default)]
pub struct DatabaseRegistry {
    handles: Mutex<HashMap<(String, DatabaseLocation), Arc<OnceCell<Database>>>>,
    /// Number of opens actually performed (not served from a shared handle)
    opens: AtomicUsize,
}

impl DatabaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by the whole process.
    pub fn global() -> &'static DatabaseRegistry {
        static GLOBAL: OnceLock<DatabaseRegistry> = OnceLock::new();
        GLOBAL.get_or_init(DatabaseRegistry::new)
    }

    /// Return the shared handle for `name` at `location`, opening and
    /// migrating it on first use.
    pub async fn open(
        &self,
        name: &str,
        location: DatabaseLocation,
        version: u32,
        plan: MigrationPlan,
    ) -> Result<Database> {
        let cell = {
            let mut handles = self.handles.lock();
            Arc::clone(
                handles
                    .entry((name.to_string(), location.clone()))
                    .or_default(),
            )
        };

        let db = cell
            .get_or_try_init(move || async move {
                self.opens.fetch_add(1, Ordering::SeqCst);
                let name = name.to_string();
                tokio::task::spawn_blocking(move || {
                    Database::open(&name, &location, version, &plan)
                })
                .await?
            })
            .await?;

        if db.version() != version {
            return Err(StorageError::AlreadyOpen {
                name: name.to_string(),
                version: db.version(),
            });
        }

        Ok(db.clone())
    }

    /// The shared handle for `name` at `location`, if it has been opened.
    pub fn get(&self, name: &str, location: &DatabaseLocation) -> Option<Database> {
        self.handles
            .lock()
            .get(&(name.to_string(), location.clone()))
            .and_then(|cell| cell.get().cloned())
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Forget the shared handle for `name` and delete its files. Clones of
    /// the handle still held elsewhere keep their connection until dropped.
    pub async fn delete_database(&self, name: &str, location: &DatabaseLocation) -> Result<()> {
        let removed = self
            .handles
            .lock()
            .remove(&(name.to_string(), location.clone()));
        drop(removed);

        if let Some(path) = location.path_for(name) {
            let mut files = vec![path.clone()];
            for suffix in ["-wal", "-shm"] {
                let mut sidecar = path.clone().into_os_string();
                sidecar.push(suffix);
                files.push(sidecar.into());
            }

            for file in files {
                match tokio::fs::remove_file(&file).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        tracing::info!(database = %name, "Deleted database");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::SchemaStep;

    fn plan() -> MigrationPlan {
        MigrationPlan::new()
            .step(1, SchemaStep::create_collection("vmSounds", "name"))
            .step(2, SchemaStep::create_collection("sound-recordings", "assetId"))
    }

    #[tokio::test]
    async fn test_repeat_open_returns_shared_handle() {
        let registry = DatabaseRegistry::new();
        let a = registry
            .open("assets", DatabaseLocation::Memory, 2, plan())
            .await
            .unwrap();
        let b = registry
            .open("assets", DatabaseLocation::Memory, 2, plan())
            .await
            .unwrap();

        assert!(a.same_handle(&b));
        assert_eq!(registry.open_count(), 1);
        assert!(registry
            .get("assets", &DatabaseLocation::Memory)
            .unwrap()
            .same_handle(&a));
        assert!(registry.get("other", &DatabaseLocation::Memory).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_opens_converge() {
        let registry = Arc::new(DatabaseRegistry::new());
        let dir = tempfile::tempdir().unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let location = DatabaseLocation::Directory(dir.path().to_path_buf());
            tasks.push(tokio::spawn(async move {
                registry.open("assets", location, 2, plan()).await
            }));
        }

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap().unwrap());
        }

        assert_eq!(registry.open_count(), 1);
        assert!(handles.iter().all(|h| h.same_handle(&handles[0])));
        assert_eq!(handles[0].migration_outcome().applied, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_mismatched_version_is_rejected() {
        let registry = DatabaseRegistry::new();
        registry
            .open("assets", DatabaseLocation::Memory, 1, plan())
            .await
            .unwrap();

        let err = registry
            .open("assets", DatabaseLocation::Memory, 2, plan())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::AlreadyOpen { version: 1, .. }));
    }

    #[tokio::test]
    async fn test_failed_open_is_not_cached() {
        let registry = DatabaseRegistry::new();
        let dir = tempfile::tempdir().unwrap();
        let location = DatabaseLocation::Directory(dir.path().to_path_buf());

        let broken = plan().step(
            3,
            SchemaStep::create_index("missing", crate::schema::IndexSpec::new("x", "x")),
        );
        let err = registry
            .open("assets", location.clone(), 3, broken)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Migration { .. }));
        assert!(registry.get("assets", &location).is_none());

        let db = registry.open("assets", location, 2, plan()).await.unwrap();
        assert_eq!(db.migration_outcome().from_version, 0);
        assert_eq!(registry.open_count(), 2);
    }

    #[tokio::test]
    async fn test_delete_database_resets() {
        let registry = DatabaseRegistry::new();
        let dir = tempfile::tempdir().unwrap();
        let location = DatabaseLocation::Directory(dir.path().to_path_buf());

        let db = registry
            .open("assets", location.clone(), 2, plan())
            .await
            .unwrap();
        drop(db);

        registry.delete_database("assets", &location).await.unwrap();
        assert!(registry.get("assets", &location).is_none());
        assert!(!dir.path().join("assets.sqlite3").exists());

        let db = registry.open("assets", location, 1, plan()).await.unwrap();
        assert_eq!(db.version(), 1);
        assert_eq!(registry.open_count(), 2);
    }

    #[tokio::test]
    async fn test_same_name_in_other_directory_is_separate() {
        let registry = DatabaseRegistry::new();
        let first_dir = tempfile::tempdir().unwrap();
        let second_dir = tempfile::tempdir().unwrap();
        let first = DatabaseLocation::Directory(first_dir.path().to_path_buf());
        let second = DatabaseLocation::Directory(second_dir.path().to_path_buf());

        let a = registry.open("assets", first.clone(), 2, plan()).await.unwrap();
        let b = registry.open("assets", second.clone(), 2, plan()).await.unwrap();

        assert!(!a.same_handle(&b));
        assert_eq!(b.location(), &second);
        assert!(second_dir.path().join("assets.sqlite3").exists());
        assert_eq!(registry.open_count(), 2);
        assert!(registry.get("assets", &first).unwrap().same_handle(&a));
    }
}
