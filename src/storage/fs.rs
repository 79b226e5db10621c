//! Filesystem access used by the recovery pipeline and the backup rotator.
//!
//! Kept behind a trait so tests can inject failing devices.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

/// Buffer size for settings file writes.
const WRITE_BUFFER_SIZE: usize = 8192;

/// Filesystem primitives consumed by the settings store.
pub trait FileSystem: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Replace the file contents and flush them to disk before returning.
    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;

    fn copy(&self, from: &Path, to: &Path) -> io::Result<()>;

    fn remove(&self, path: &Path) -> io::Result<()>;

    /// Files directly inside `dir`. A missing directory lists as empty.
    fn list(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;

    /// Last modification time in milliseconds since UNIX epoch.
    fn modified_ms(&self, path: &Path) -> io::Result<u64>;

    fn set_modified_ms(&self, path: &Path, ms: u64) -> io::Result<()>;

    fn create_dir_all(&self, dir: &Path) -> io::Result<()>;
}

/// [`FileSystem`] backed by `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileSystem;

impl FileSystem for LocalFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);
        writer.write_all(bytes)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()
    }

    fn copy(&self, from: &Path, to: &Path) -> io::Result<()> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(from, to).map(|_| ())
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn list(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        Ok(entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect())
    }

    fn modified_ms(&self, path: &Path) -> io::Result<u64> {
        let modified = fs::metadata(path)?.modified()?;
        Ok(modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0))
    }

    fn set_modified_ms(&self, path: &Path, ms: u64) -> io::Result<()> {
        let file = File::options().write(true).open(path)?;
        file.set_modified(UNIX_EPOCH + Duration::from_millis(ms))
    }

    fn create_dir_all(&self, dir: &Path) -> io::Result<()> {
        fs::create_dir_all(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_copy_remove() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem;
        let a = tmp_dir.path().join("nested/a.bin");
        let b = tmp_dir.path().join("other/b.bin");

        fs.write(&a, b"hello").unwrap();
        assert!(fs.exists(&a));
        assert_eq!(fs.read(&a).unwrap(), b"hello");

        fs.copy(&a, &b).unwrap();
        assert_eq!(fs.read(&b).unwrap(), b"hello");

        fs.remove(&a).unwrap();
        assert!(!fs.exists(&a));
    }

    #[test]
    fn test_list_missing_dir_is_empty() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let listed = LocalFileSystem.list(&tmp_dir.path().join("nope")).unwrap();
        assert!(listed.is_empty());
    }

    #[test]
    fn test_set_modified_round_trip() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem;
        let path = tmp_dir.path().join("m.bin");
        fs.write(&path, b"x").unwrap();

        fs.set_modified_ms(&path, 1_600_000_000_000).unwrap();
        assert_eq!(fs.modified_ms(&path).unwrap(), 1_600_000_000_000);
    }
}
