//! # Backup Rotator
//!
//! Rate-limited, best-effort snapshots of the primary settings file.
//! Analogous to logrotate for a single small file: each rotation copies the
//! current primary into the backup directory under a timestamp name and
//! prunes the oldest snapshots beyond the retention cap.

use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::time::Duration;

use crate::recovery::list_backups;
use crate::storage::fs::FileSystem;
use crate::storage::types::SettingsFiles;

/// Maximum rotated backups kept on disk.
pub const DEFAULT_MAX_BACKUPS: usize = 10;

/// Minimum spacing between two rotations.
pub const DEFAULT_MIN_BACKUP_INTERVAL: Duration = Duration::from_millis(1000 * 60 * 2);

/// Backup rotation policy.
#[derive(Debug, Clone)]
pub struct BackupPolicy {
    /// Maximum number of rotated files to keep
    pub max_backups: usize,
    /// Minimum time between rotations
    pub min_interval: Duration,
}

impl Default for BackupPolicy {
    fn default() -> Self {
        BackupPolicy {
            max_backups: DEFAULT_MAX_BACKUPS,
            min_interval: DEFAULT_MIN_BACKUP_INTERVAL,
        }
    }
}

/// Tracks when the last rotation was scheduled and hands out jobs.
#[derive(Debug)]
pub struct BackupRotator {
    policy: BackupPolicy,
    last_backup_at: Option<u64>,
}

impl BackupRotator {
    pub fn new(policy: BackupPolicy) -> Self {
        Self {
            policy: BackupPolicy {
                max_backups: policy.max_backups.max(1),
                ..policy
            },
            last_backup_at: None,
        }
    }

    pub fn policy(&self) -> &BackupPolicy {
        &self.policy
    }

    /// Time the last rotation was scheduled (Unix timestamp ms).
    pub fn last_backup_at(&self) -> Option<u64> {
        self.last_backup_at
    }

    /// Whether enough time has passed for another rotation.
    pub fn is_due(&self, now_ms: u64) -> bool {
        match self.last_backup_at {
            None => true,
            Some(last) => {
                now_ms.saturating_sub(last) >= self.policy.min_interval.as_millis() as u64
            }
        }
    }

    /// Called after every successful save. Returns a job when a rotation is
    /// due and records `now_ms` as the new backup time.
    pub fn schedule(&mut self, files: &SettingsFiles, now_ms: u64) -> Option<RotationJob> {
        if !self.is_due(now_ms) {
            debug!("Skipping settings backup, last one is too recent");
            return None;
        }

        self.last_backup_at = Some(now_ms);
        Some(RotationJob {
            primary: files.primary.clone(),
            backup_dir: files.backup_dir.clone(),
            target: files.rotated_backup(now_ms),
            timestamp_ms: now_ms,
            max_backups: self.policy.max_backups,
        })
    }
}

/// One pending rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationJob {
    /// File being snapshotted
    pub primary: PathBuf,
    /// Rotated backup directory
    pub backup_dir: PathBuf,
    /// Name of the new snapshot
    pub target: PathBuf,
    /// Creation time recorded on the snapshot
    pub timestamp_ms: u64,
    /// Retention cap
    pub max_backups: usize,
}

/// What a rotation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationReport {
    /// New snapshot, if the copy succeeded
    pub created: Option<PathBuf>,
    /// Number of old snapshots deleted
    pub pruned: usize,
}

impl RotationJob {
    /// Perform the rotation. Failures are logged and never returned.
    pub fn run(&self, fs: &dyn FileSystem) -> RotationReport {
        let mut report = RotationReport::default();

        // Newest first, so the oldest snapshots sit at the tail.
        let mut previous: Vec<PathBuf> = list_backups(fs, &self.backup_dir)
            .into_iter()
            .filter(|path| *path != self.target)
            .collect();

        if let Err(e) = fs.create_dir_all(&self.backup_dir) {
            error!(
                "Failed to create backup directory {}: {}",
                self.backup_dir.display(),
                e
            );
            return report;
        }

        match fs.copy(&self.primary, &self.target) {
            Ok(()) => {
                if let Err(e) = fs.set_modified_ms(&self.target, self.timestamp_ms) {
                    warn!(
                        "Failed to stamp backup {}: {}",
                        self.target.display(),
                        e
                    );
                }
                info!("Created settings backup {}", self.target.display());
                report.created = Some(self.target.clone());
            }
            Err(e) => {
                error!(
                    "Failed to create settings backup {}: {}",
                    self.target.display(),
                    e
                );
            }
        }

        while previous.len() >= self.max_backups {
            let Some(oldest) = previous.pop() else { break };
            match fs.remove(&oldest) {
                Ok(()) => report.pruned += 1,
                Err(e) => warn!("Failed to delete old backup {}: {}", oldest.display(), e),
            }
        }

        report
    }
}
