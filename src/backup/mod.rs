//! Backup creation - rotated snapshots taken after saves.
//!
//! 1. **BackupRotator**: rate limit and retention for timestamped snapshots
//! 2. **SequentialWorker**: the single background thread rotations run on

pub mod rotator;
pub mod worker;

pub use rotator::{BackupPolicy, BackupRotator, RotationJob, RotationReport};
pub use worker::{BackgroundTaskRunner, InlineRunner, SequentialWorker, Task};
