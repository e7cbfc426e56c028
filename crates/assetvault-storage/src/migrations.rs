//! Schema migrations
//!
//! A [`MigrationPlan`] maps schema versions to the steps that bring the
//! database up to that version. Opening at version `N` applies, in ascending
//! order, every step newer than the stored version and no newer than `N`,
//! all inside one exclusive transaction.

use rusqlite::{Connection, TransactionBehavior};
use std::collections::BTreeMap;

use crate::error::StorageError;
use crate::schema::{self, CollectionSpec, IndexSpec};
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaStep {
    CreateCollection(CollectionSpec),
    CreateIndex { collection: String, index: IndexSpec },
}

impl SchemaStep {
    pub fn create_collection(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        SchemaStep::CreateCollection(CollectionSpec::new(name, key_path))
    }

    pub fn create_index(collection: impl Into<String>, index: IndexSpec) -> Self {
        SchemaStep::CreateIndex {
            collection: collection.into(),
            index,
        }
    }

    /// Apply the step. Returns `false` if it was already in place.
    fn apply(&self, conn: &Connection) -> Result<bool> {
        match self {
            SchemaStep::CreateCollection(spec) => schema::create_collection(conn, spec),
            SchemaStep::CreateIndex { collection, index } => {
                schema::create_index(conn, collection, index)
            }
        }
    }
}

/// Ordered `(version -> steps)` map.
#[derive(Debug, Clone, Default)]
pub struct MigrationPlan {
    steps: BTreeMap<u32, Vec<SchemaStep>>,
}

impl MigrationPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a step to `version`. Steps within a version run in insertion order.
    pub fn step(mut self, version: u32, step: SchemaStep) -> Self {
        self.steps.entry(version).or_default().push(step);
        self
    }

    /// Highest version the plan knows about.
    pub fn latest_version(&self) -> u32 {
        self.steps.keys().next_back().copied().unwrap_or(0)
    }

    fn pending(&self, from: u32, to: u32) -> impl Iterator<Item = (&u32, &Vec<SchemaStep>)> {
        self.steps.range(from.saturating_add(1)..=to)
    }
}

/// What an open did to the schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOutcome {
    pub from_version: u32,
    pub to_version: u32,
    /// Versions whose steps ran, ascending
    pub applied: Vec<u32>,
    /// Steps that actually changed the schema (not already in place)
    pub changes: usize,
}

impl MigrationOutcome {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Highest version `PRAGMA user_version` can hold (a signed 32-bit value).
pub const MAX_VERSION: u32 = i32::MAX as u32;

pub fn schema_version(conn: &Connection) -> Result<u32> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    u32::try_from(version)
        .ok()
        .filter(|v| *v <= MAX_VERSION)
        .ok_or(StorageError::CorruptVersion(version))
}

/// Bring `conn` up to `target`, or leave it untouched on any failure.
pub fn run_migrations(
    conn: &mut Connection,
    name: &str,
    target: u32,
    plan: &MigrationPlan,
) -> Result<MigrationOutcome> {
    if target == 0 || target > MAX_VERSION {
        return Err(StorageError::InvalidVersion(target));
    }

    // The stored version is read under the exclusive lock so two openers
    // cannot both decide to upgrade.
    let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
    let stored = schema_version(&tx)?;

    if stored > target {
        tx.rollback()?;
        return Err(StorageError::VersionConflict {
            name: name.to_string(),
            stored,
            requested: target,
        });
    }

    if stored == target {
        tx.commit()?;
        tracing::debug!(database = %name, version = target, "Schema up to date");
        return Ok(MigrationOutcome {
            from_version: stored,
            to_version: target,
            applied: Vec::new(),
            changes: 0,
        });
    }

    let upgrade = (|| -> Result<(Vec<u32>, usize)> {
        schema::ensure_catalog(&tx)?;

        let mut applied = Vec::new();
        let mut changes = 0;
        for (version, steps) in plan.pending(stored, target) {
            for step in steps {
                if step.apply(&tx)? {
                    changes += 1;
                }
            }
            tracing::info!(database = %name, version = *version, "Applied migration");
            applied.push(*version);
        }

        tx.pragma_update(None, "user_version", i64::from(target))?;
        Ok((applied, changes))
    })();

    match upgrade {
        Ok((applied, changes)) => {
            tx.commit()
                .map_err(|e| StorageError::migration(name, stored, target, e.into()))?;
            tracing::info!(
                database = %name,
                from = stored,
                to = target,
                "Schema migrated"
            );
            Ok(MigrationOutcome {
                from_version: stored,
                to_version: target,
                applied,
                changes,
            })
        }
        Err(cause) => {
            if let Err(e) = tx.rollback() {
                tracing::error!(database = %name, "Failed to roll back migration: {}", e);
            }
            tracing::warn!(
                database = %name,
                from = stored,
                to = target,
                "Migration aborted: {}",
                cause
            );
            Err(StorageError::migration(name, stored, target, cause))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;

    fn plan() -> MigrationPlan {
        MigrationPlan::new()
            .step(1, SchemaStep::create_collection("sound-recordings", "assetId"))
            .step(
                2,
                SchemaStep::create_index("sound-recordings", IndexSpec::new("assetType", "assetType")),
            )
            .step(3, SchemaStep::create_collection("vmSounds", "name"))
    }

    #[test]
    fn test_fresh_database_runs_every_step() {
        let mut conn = Connection::open_in_memory().unwrap();
        let outcome = run_migrations(&mut conn, "test", 3, &plan()).unwrap();

        assert_eq!(outcome.from_version, 0);
        assert_eq!(outcome.applied, vec![1, 2, 3]);
        assert_eq!(outcome.changes, 3);
        assert_eq!(schema_version(&conn).unwrap(), 3);

        let schema = Schema::load(&conn).unwrap();
        assert!(schema.contains("vmSounds"));
        assert!(schema.index("sound-recordings", "assetType").is_ok());
    }

    #[test]
    fn test_reopen_at_same_version_is_noop() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn, "test", 3, &plan()).unwrap();

        let outcome = run_migrations(&mut conn, "test", 3, &plan()).unwrap();
        assert!(outcome.is_noop());
        assert_eq!(outcome.changes, 0);
    }

    #[test]
    fn test_upgrade_applies_only_newer_steps() {
        let mut conn = Connection::open_in_memory().unwrap();
        let first = run_migrations(&mut conn, "test", 1, &plan()).unwrap();
        assert_eq!(first.applied, vec![1]);
        assert!(!Schema::load(&conn).unwrap().contains("vmSounds"));

        let second = run_migrations(&mut conn, "test", 3, &plan()).unwrap();
        assert_eq!(second.from_version, 1);
        assert_eq!(second.applied, vec![2, 3]);
        assert!(Schema::load(&conn).unwrap().contains("vmSounds"));
    }

    #[test]
    fn test_downgrade_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn, "test", 3, &plan()).unwrap();

        let err = run_migrations(&mut conn, "test", 2, &plan()).unwrap_err();
        assert!(matches!(
            err,
            StorageError::VersionConflict { stored: 3, requested: 2, .. }
        ));
        assert_eq!(schema_version(&conn).unwrap(), 3);
    }

    #[test]
    fn test_failed_step_rolls_back_whole_upgrade() {
        let mut conn = Connection::open_in_memory().unwrap();
        let broken = plan().step(
            4,
            SchemaStep::create_index("missing", IndexSpec::new("by_name", "name")),
        );
        run_migrations(&mut conn, "test", 1, &broken).unwrap();

        let err = run_migrations(&mut conn, "test", 4, &broken).unwrap_err();
        match err {
            StorageError::Migration {
                from_version,
                to_version,
                cause,
                ..
            } => {
                assert_eq!(from_version, 1);
                assert_eq!(to_version, 4);
                assert!(matches!(*cause, StorageError::CollectionNotFound(_)));
            }
            other => panic!("unexpected error: {other}"),
        }

        // Steps 2 and 3 ran inside the aborted transaction and must be gone
        assert_eq!(schema_version(&conn).unwrap(), 1);
        let schema = Schema::load(&conn).unwrap();
        assert!(!schema.contains("vmSounds"));
        assert!(schema.index("sound-recordings", "assetType").is_err());
    }

    #[test]
    fn test_reapplied_step_is_noop() {
        // A later version re-declaring an existing collection does not fail
        let mut conn = Connection::open_in_memory().unwrap();
        let plan = plan().step(4, SchemaStep::create_collection("vmSounds", "name"));
        run_migrations(&mut conn, "test", 3, &plan).unwrap();

        let outcome = run_migrations(&mut conn, "test", 4, &plan).unwrap();
        assert_eq!(outcome.applied, vec![4]);
        assert_eq!(outcome.changes, 0);
    }

    #[test]
    fn test_zero_target_is_invalid() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert!(matches!(
            run_migrations(&mut conn, "test", 0, &plan()),
            Err(StorageError::InvalidVersion(0))
        ));
    }

    #[test]
    fn test_target_beyond_stored_range_is_invalid() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn, "test", 3, &plan()).unwrap();

        let err = run_migrations(&mut conn, "test", 3_000_000_000, &plan()).unwrap_err();
        assert!(matches!(err, StorageError::InvalidVersion(3_000_000_000)));
        assert_eq!(schema_version(&conn).unwrap(), 3);

        let outcome = run_migrations(&mut conn, "test", MAX_VERSION, &plan()).unwrap();
        assert_eq!(outcome.from_version, 3);
        assert_eq!(schema_version(&conn).unwrap(), MAX_VERSION);

        // The version never goes back down
        let err = run_migrations(&mut conn, "test", 5, &plan()).unwrap_err();
        assert!(matches!(err, StorageError::VersionConflict { .. }));
    }

    #[test]
    fn test_negative_stored_version_is_reported() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", -1i64).unwrap();

        assert!(matches!(
            schema_version(&conn),
            Err(StorageError::CorruptVersion(-1))
        ));
        let err = run_migrations(&mut conn, "test", 5, &plan()).unwrap_err();
        assert!(matches!(err, StorageError::CorruptVersion(-1)));
        assert!(Schema::load(&conn).unwrap().collection_names().is_empty());
    }
}
