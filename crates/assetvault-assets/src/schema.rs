//! Durable layout of the asset database
//!
//! Names and key paths below are persisted; changing any of them needs a new
//! migration version.
//!
//! - v1: `sound-recordings`, keyed by `assetId`
//! - v2: non-unique index `assetType` on `sound-recordings`
//! - v3: `vmSounds`, keyed by `name`

use assetvault_storage::{IndexSpec, MigrationPlan, SchemaStep};

pub const DATABASE_NAME: &str = "custom-assets";
pub const SCHEMA_VERSION: u32 = 3;

pub const SOUND_RECORDINGS: &str = "sound-recordings";
pub const VM_SOUNDS: &str = "vmSounds";

pub const ASSET_TYPE_INDEX: &str = "assetType";

pub fn migration_plan() -> MigrationPlan {
    MigrationPlan::new()
        .step(1, SchemaStep::create_collection(SOUND_RECORDINGS, "assetId"))
        .step(
            2,
            SchemaStep::create_index(SOUND_RECORDINGS, IndexSpec::new(ASSET_TYPE_INDEX, "assetType")),
        )
        .step(3, SchemaStep::create_collection(VM_SOUNDS, "name"))
}
