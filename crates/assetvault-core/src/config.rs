//! Store configuration

use assetvault_assets::schema::DATABASE_NAME;
use assetvault_storage::DatabaseLocation;
use serde::{Deserialize, Serialize};
use std::env;
use std::ffi::OsString;
use std::path::PathBuf;

/// Environment variable overriding the default data directory
pub const DATA_DIR_ENV: &str = "ASSETVAULT_DATA_DIR";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the database file
    pub data_dir: PathBuf,
    /// Name of the asset database (its file stem on disk)
    #[serde(default = "default_database_name")]
    pub database_name: String,
    /// Keep everything in memory (nothing survives the process)
    #[serde(default)]
    pub in_memory: bool,
    /// Default `tracing` filter when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Config {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            database_name: default_database_name(),
            in_memory: false,
            log_filter: default_log_filter(),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            in_memory: true,
            ..Self::default()
        }
    }

    /// Parse a JSON configuration document.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn location(&self) -> DatabaseLocation {
        if self.in_memory {
            DatabaseLocation::Memory
        } else {
            DatabaseLocation::Directory(self.data_dir.clone())
        }
    }

    /// Default data directory: `$ASSETVAULT_DATA_DIR` if set, otherwise
    /// `assetvault` under the platform's local data root.
    pub fn data_dir() -> PathBuf {
        resolve_data_dir(env::var_os(DATA_DIR_ENV), platform_data_root())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Self::data_dir())
    }
}

fn default_database_name() -> String {
    DATABASE_NAME.to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

/// Per-user local data root: `%LOCALAPPDATA%`, `~/Library/Application
/// Support`, or `$XDG_DATA_HOME` falling back to `~/.local/share`.
fn platform_data_root() -> Option<PathBuf> {
    let home = || env::var_os("HOME").map(PathBuf::from);

    if cfg!(target_os = "windows") {
        env::var_os("LOCALAPPDATA").map(PathBuf::from)
    } else if cfg!(target_os = "macos") {
        home().map(|h| h.join("Library").join("Application Support"))
    } else if cfg!(unix) {
        env::var_os("XDG_DATA_HOME")
            .filter(|d| !d.is_empty())
            .map(PathBuf::from)
            .or_else(|| home().map(|h| h.join(".local").join("share")))
    } else {
        None
    }
}

fn resolve_data_dir(overridden: Option<OsString>, root: Option<PathBuf>) -> PathBuf {
    match (overridden, root) {
        (Some(dir), _) if !dir.is_empty() => PathBuf::from(dir),
        (_, Some(root)) => root.join("assetvault"),
        _ => PathBuf::from(".assetvault"),
    }
}
