//! Load-with-fallback recovery.
//!
//! Candidate sources are probed in a fixed order:
//! 1. primary settings file
//! 2. single-backup file
//! 3. rotated backups, newest first
//!
//! The first source that decodes cleanly wins and is copied back over the
//! files that precede it. Content is never merged across sources.

use log::{error, info, warn};
use std::path::{Path, PathBuf};

use crate::error::{Result, SettingsError};
use crate::storage::codec;
use crate::storage::fs::FileSystem;
use crate::storage::types::{backup_timestamp, is_backup_file, LoadSource, SettingsFiles};
use crate::types::Store;

/// One place the store may be loaded from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Candidate {
    Primary(PathBuf),
    SingleBackup(PathBuf),
    Rotated(PathBuf),
}

impl Candidate {
    pub fn path(&self) -> &Path {
        match self {
            Candidate::Primary(p) | Candidate::SingleBackup(p) | Candidate::Rotated(p) => p,
        }
    }

    fn source(&self) -> LoadSource {
        match self {
            Candidate::Primary(_) => LoadSource::Primary,
            Candidate::SingleBackup(_) => LoadSource::SingleBackup,
            Candidate::Rotated(p) => LoadSource::Rotated(p.clone()),
        }
    }
}

/// Result of a pipeline run.
#[derive(Debug)]
pub struct Recovered {
    /// Decoded values (empty for `Fresh` and `Exhausted`)
    pub store: Store,
    /// Where the values came from
    pub source: LoadSource,
    /// Copying the winning file back into place failed. The values are still
    /// valid; the files on disk were left as they were.
    pub restore_error: Option<SettingsError>,
}

impl Recovered {
    fn empty(source: LoadSource) -> Self {
        Self {
            store: Store::new(),
            source,
            restore_error: None,
        }
    }
}

/// Linear recovery state machine over the settings files.
pub struct LoadPipeline<'a> {
    fs: &'a dyn FileSystem,
    files: &'a SettingsFiles,
}

impl<'a> LoadPipeline<'a> {
    pub fn new(fs: &'a dyn FileSystem, files: &'a SettingsFiles) -> Self {
        Self { fs, files }
    }

    /// Run the pipeline. Decode failures only advance to the next candidate,
    /// so a run always ends with some store, possibly empty.
    pub fn run(&self) -> Recovered {
        if !self.fs.exists(&self.files.primary) && !self.fs.exists(&self.files.single_backup) {
            return Recovered::empty(LoadSource::Fresh);
        }

        for candidate in self.candidates() {
            match self.probe(candidate.path()) {
                Ok(store) => {
                    if !matches!(candidate, Candidate::Primary(_)) {
                        info!(
                            "Loaded backup settings file {} successfully",
                            candidate.path().display()
                        );
                    }
                    let restore_error = self.restore(&candidate).err();
                    if let Some(ref e) = restore_error {
                        error!("Failed to restore settings files after load: {}", e);
                    }
                    return Recovered {
                        store,
                        source: candidate.source(),
                        restore_error,
                    };
                }
                Err(e) => {
                    error!(
                        "Failed to load settings file {}: {}",
                        candidate.path().display(),
                        e
                    );
                }
            }
        }

        error!("No readable settings file found, starting with empty settings");
        Recovered::empty(LoadSource::Exhausted)
    }

    /// Ordered candidate list: primary, single backup, then rotated backups
    /// newest first.
    pub fn candidates(&self) -> Vec<Candidate> {
        let mut candidates = vec![
            Candidate::Primary(self.files.primary.clone()),
            Candidate::SingleBackup(self.files.single_backup.clone()),
        ];

        candidates.extend(
            list_backups(self.fs, &self.files.backup_dir)
                .into_iter()
                .map(Candidate::Rotated),
        );

        candidates
    }

    fn probe(&self, path: &Path) -> Result<Store> {
        let bytes = self.fs.read(path)?;
        codec::decode(&bytes)
    }

    /// Copy the winning source over the files probed before it.
    fn restore(&self, candidate: &Candidate) -> Result<()> {
        match candidate {
            Candidate::Primary(path) => {
                self.fs.copy(path, &self.files.single_backup)?;
            }
            Candidate::SingleBackup(path) => {
                self.fs.copy(path, &self.files.primary)?;
            }
            Candidate::Rotated(path) => {
                self.fs.copy(path, &self.files.primary)?;
                self.fs.copy(path, &self.files.single_backup)?;
            }
        }
        Ok(())
    }
}

/// Rotated backups in `dir`, newest first.
///
/// Ordered by modification time with the file-name timestamp breaking ties.
/// A directory that cannot be listed yields no backups.
pub fn list_backups(fs: &dyn FileSystem, dir: &Path) -> Vec<PathBuf> {
    let files = match fs.list(dir) {
        Ok(files) => files,
        Err(e) => {
            warn!("Failed to list backup directory {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut backups: Vec<(u64, u64, PathBuf)> = files
        .into_iter()
        .filter(|path| is_backup_file(path))
        .map(|path| {
            let modified = fs.modified_ms(&path).unwrap_or(0);
            let stamp = backup_timestamp(&path).unwrap_or(0);
            (modified, stamp, path)
        })
        .collect();

    backups.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));
    backups.into_iter().map(|(_, _, path)| path).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fs::LocalFileSystem;
    use crate::types::Value;

    fn store_with(key: &str, value: i32) -> Store {
        let mut store = Store::new();
        store.insert(key.to_string(), Value::Int(value));
        store
    }

    fn write_store(fs: &LocalFileSystem, path: &Path, store: &Store) {
        fs.write(path, &codec::encode(store, false).unwrap()).unwrap();
    }

    #[test]
    fn test_fresh_directory() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let files = SettingsFiles::new(tmp_dir.path());
        let recovered = LoadPipeline::new(&LocalFileSystem, &files).run();

        assert_eq!(recovered.source, LoadSource::Fresh);
        assert!(recovered.store.is_empty());
    }

    #[test]
    fn test_primary_refreshes_single_backup() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem;
        let files = SettingsFiles::new(tmp_dir.path());
        write_store(&fs, &files.primary, &store_with("a", 1));

        let recovered = LoadPipeline::new(&fs, &files).run();

        assert_eq!(recovered.source, LoadSource::Primary);
        assert_eq!(recovered.store, store_with("a", 1));
        assert_eq!(
            fs.read(&files.single_backup).unwrap(),
            fs.read(&files.primary).unwrap()
        );
    }

    #[test]
    fn test_single_backup_restores_primary() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem;
        let files = SettingsFiles::new(tmp_dir.path());
        fs.write(&files.primary, &[0, 0, 0, 0]).unwrap();
        write_store(&fs, &files.single_backup, &store_with("b", 2));

        let recovered = LoadPipeline::new(&fs, &files).run();

        assert_eq!(recovered.source, LoadSource::SingleBackup);
        assert_eq!(recovered.store, store_with("b", 2));
        assert_eq!(
            codec::decode(&fs.read(&files.primary).unwrap()).unwrap(),
            store_with("b", 2)
        );
    }

    #[test]
    fn test_newest_rotated_backup_wins() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem;
        let files = SettingsFiles::new(tmp_dir.path());
        fs.write(&files.primary, &[]).unwrap();

        let old = files.rotated_backup(1_000);
        let new = files.rotated_backup(2_000);
        write_store(&fs, &old, &store_with("v", 1));
        write_store(&fs, &new, &store_with("v", 2));
        fs.set_modified_ms(&old, 1_000).unwrap();
        fs.set_modified_ms(&new, 2_000).unwrap();

        let recovered = LoadPipeline::new(&fs, &files).run();

        assert_eq!(recovered.source, LoadSource::Rotated(new));
        assert_eq!(recovered.store, store_with("v", 2));
        assert!(fs.exists(&files.single_backup));
    }

    #[test]
    fn test_corrupt_rotated_backup_is_skipped() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem;
        let files = SettingsFiles::new(tmp_dir.path());
        fs.write(&files.primary, &[0; 16]).unwrap();

        let good = files.rotated_backup(1_000);
        let bad = files.rotated_backup(2_000);
        write_store(&fs, &good, &store_with("ok", 1));
        fs.write(&bad, &[0xFF; 3]).unwrap();
        fs.set_modified_ms(&good, 1_000).unwrap();
        fs.set_modified_ms(&bad, 2_000).unwrap();

        let recovered = LoadPipeline::new(&fs, &files).run();
        assert_eq!(recovered.source, LoadSource::Rotated(good));
    }

    #[test]
    fn test_all_candidates_fail() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem;
        let files = SettingsFiles::new(tmp_dir.path());
        fs.write(&files.primary, &[0, 0, 0, 0]).unwrap();
        fs.write(&files.rotated_backup(5), &[1]).unwrap();

        let recovered = LoadPipeline::new(&fs, &files).run();
        assert_eq!(recovered.source, LoadSource::Exhausted);
        assert!(recovered.store.is_empty());
    }

    #[test]
    fn test_candidate_order() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem;
        let files = SettingsFiles::new(tmp_dir.path());
        let a = files.rotated_backup(10);
        let b = files.rotated_backup(20);
        fs.write(&a, b"a").unwrap();
        fs.write(&b, b"b").unwrap();
        fs.write(&files.backup_dir.join("README.txt"), b"ignored").unwrap();
        fs.set_modified_ms(&a, 10).unwrap();
        fs.set_modified_ms(&b, 20).unwrap();

        let candidates = LoadPipeline::new(&fs, &files).candidates();
        assert_eq!(
            candidates,
            vec![
                Candidate::Primary(files.primary.clone()),
                Candidate::SingleBackup(files.single_backup.clone()),
                Candidate::Rotated(b),
                Candidate::Rotated(a),
            ]
        );
    }
}
