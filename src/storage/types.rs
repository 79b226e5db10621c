//! Storage data structures.
//!
//! Defines the on-disk layout of a settings directory and the outcome types
//! shared by the recovery pipeline and the backup rotator.

use serde::Serialize;
use std::path::{Path, PathBuf};

/// Primary settings file name.
pub const SETTINGS_FILE: &str = "settings.bin";

/// Dedicated most-recent-known-good snapshot.
pub const BACKUP_SETTINGS_FILE: &str = "settings_backup.bin";

/// Directory holding timestamp-named rotated backups.
pub const BACKUP_FOLDER: &str = "settings_backups";

/// Extension of rotated backup files.
pub const BACKUP_EXTENSION: &str = "bin";

/// Resolved file locations for one settings directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettingsFiles {
    /// Directory containing everything below
    pub data_dir: PathBuf,
    /// Authoritative settings file
    pub primary: PathBuf,
    /// Single-backup file, refreshed after each good primary load
    pub single_backup: PathBuf,
    /// Rotated backup directory
    pub backup_dir: PathBuf,
}

impl SettingsFiles {
    /// Lay out the settings files under `data_dir`.
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        let data_dir = data_dir.as_ref().to_path_buf();
        Self {
            primary: data_dir.join(SETTINGS_FILE),
            single_backup: data_dir.join(BACKUP_SETTINGS_FILE),
            backup_dir: data_dir.join(BACKUP_FOLDER),
            data_dir,
        }
    }

    /// Path of a rotated backup created at `timestamp_ms`.
    pub fn rotated_backup(&self, timestamp_ms: u64) -> PathBuf {
        self.backup_dir
            .join(format!("{}.{}", timestamp_ms, BACKUP_EXTENSION))
    }
}

/// Returns true for files that look like rotated backups.
pub fn is_backup_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(BACKUP_EXTENSION)
}

/// Creation timestamp encoded in a rotated backup's file name, if any.
pub fn backup_timestamp(path: &Path) -> Option<u64> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.parse().ok())
}

/// Where the last `load()` took its values from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum LoadSource {
    /// No settings file existed yet
    Fresh,
    /// Primary file decoded cleanly
    Primary,
    /// Primary was unreadable; single-backup file used
    SingleBackup,
    /// Both files unreadable; this rotated backup used
    Rotated(PathBuf),
    /// Every candidate failed; store left empty
    Exhausted,
}

impl LoadSource {
    /// True when the store was restored from something other than the primary.
    pub fn is_recovery(&self) -> bool {
        matches!(self, LoadSource::SingleBackup | LoadSource::Rotated(_))
    }
}

/// Snapshot of a settings instance for diagnostics.
#[derive(Clone, Debug, Default, Serialize)]
pub struct SettingsStats {
    /// Number of stored keys
    pub keys: usize,
    /// Unsaved changes present
    pub modified: bool,
    /// `load()` has run
    pub loaded: bool,
    /// Source of the last load, if any
    pub last_load: Option<LoadSource>,
    /// Time the last backup was scheduled (Unix timestamp ms, 0 = never)
    pub last_backup_at: u64,
    /// Rotated backup files currently on disk
    pub backup_files: usize,
}
