//! Settings facade.
//!
//! `Settings` is the root structure of the crate: typed get/put over an
//! in-memory store, defaults, one-time flags, opaque blob values, and the
//! load/save/autosave lifecycle.
//!
//! # Thread Safety
//! - One mutex guards the store and every access to the settings files
//! - Backup rotations run on a single background worker and take the same
//!   mutex before touching files, so they never interleave with a save
//! - Error handlers and `run_once` callbacks are invoked with the mutex
//!   released, so they may call back into `Settings`
//!
//! # Failure Handling
//! `load()` and `save()` route failures to the registered error handler,
//! which fires at most once per instance. Without a handler the failure is
//! returned to the caller. A failed save deletes the primary file so the
//! next load falls back to a backup instead of reading a partial write.

use log::{debug, error, info};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::backup::{BackgroundTaskRunner, BackupRotator, RotationJob, SequentialWorker};
use crate::blob::{BlobCodec, JsonBlobCodec};
use crate::clock::{Clock, SystemClock};
use crate::config::{DataDirResolver, OsDataDirResolver, SettingsConfig};
use crate::error::{Result, SettingsError};
use crate::recovery::{list_backups, LoadPipeline};
use crate::storage::codec;
use crate::storage::fs::{FileSystem, LocalFileSystem};
use crate::storage::types::{LoadSource, SettingsFiles, SettingsStats};
use crate::types::{Store, Value};

/// Callback receiving load/save failures.
pub type ErrorHandler = Arc<dyn Fn(&SettingsError) + Send + Sync>;

/// Name of the backup worker thread.
const BACKUP_THREAD_NAME: &str = "settings-backup";

// ================================================================================================
// SHARED STATE
// ================================================================================================

/// Everything guarded by the settings mutex.
struct State {
    values: Store,
    defaults: Store,
    modified: bool,
    loaded: bool,
    autosave: bool,
    compressed: bool,
    /// Latch: the error handler has already been notified
    has_errored: bool,
    error_handler: Option<ErrorHandler>,
    /// Resolved lazily on first file access
    files: Option<SettingsFiles>,
    data_dir_override: Option<PathBuf>,
    rotator: BackupRotator,
    last_load: Option<LoadSource>,
}

// ================================================================================================
// BUILDER
// ================================================================================================

/// Assembles a [`Settings`] with injected collaborators.
pub struct SettingsBuilder {
    config: SettingsConfig,
    fs: Arc<dyn FileSystem>,
    resolver: Arc<dyn DataDirResolver>,
    blobs: Arc<dyn BlobCodec>,
    clock: Arc<dyn Clock>,
    runner: Option<Arc<dyn BackgroundTaskRunner>>,
    error_handler: Option<ErrorHandler>,
}

impl SettingsBuilder {
    pub fn file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn DataDirResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn blob_codec(mut self, blobs: Arc<dyn BlobCodec>) -> Self {
        self.blobs = blobs;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Runner for backup rotations. Defaults to a new [`SequentialWorker`].
    pub fn runner(mut self, runner: Arc<dyn BackgroundTaskRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&SettingsError) + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Build the settings instance. Spawns the backup worker unless a
    /// runner was supplied.
    pub fn build(self) -> Result<Settings> {
        let runner = match self.runner {
            Some(runner) => runner,
            None => Arc::new(SequentialWorker::new(BACKUP_THREAD_NAME)?),
        };

        let state = State {
            values: Store::new(),
            defaults: Store::new(),
            modified: false,
            loaded: false,
            autosave: self.config.autosave,
            compressed: self.config.compressed,
            has_errored: false,
            error_handler: self.error_handler,
            files: None,
            data_dir_override: self.config.data_dir.clone(),
            rotator: BackupRotator::new(self.config.backups.clone()),
            last_load: None,
        };

        Ok(Settings {
            app_name: self.config.app_name,
            state: Arc::new(Mutex::new(state)),
            fs: self.fs,
            resolver: self.resolver,
            blobs: self.blobs,
            clock: self.clock,
            runner,
        })
    }
}

// ================================================================================================
// SETTINGS
// ================================================================================================

/// Durable typed key-value settings.
pub struct Settings {
    app_name: String,
    state: Arc<Mutex<State>>,
    fs: Arc<dyn FileSystem>,
    resolver: Arc<dyn DataDirResolver>,
    blobs: Arc<dyn BlobCodec>,
    clock: Arc<dyn Clock>,
    runner: Arc<dyn BackgroundTaskRunner>,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Settings")
            .field("app_name", &self.app_name)
            .field("keys", &state.values.len())
            .field("modified", &state.modified)
            .field("loaded", &state.loaded)
            .finish()
    }
}

impl Settings {
    /// Create settings with the default filesystem, resolver, codec and
    /// backup worker.
    pub fn new(config: SettingsConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: SettingsConfig) -> SettingsBuilder {
        SettingsBuilder {
            config,
            fs: Arc::new(LocalFileSystem),
            resolver: Arc::new(OsDataDirResolver),
            blobs: Arc::new(JsonBlobCodec),
            clock: Arc::new(SystemClock),
            runner: None,
            error_handler: None,
        }
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    // ============================================================================================
    // CONFIGURATION
    // ============================================================================================

    /// Register the handler notified when `load()` or `save()` fails.
    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(&SettingsError) + Send + Sync + 'static,
    {
        self.state.lock().error_handler = Some(Arc::new(handler));
    }

    /// Whether `autosave()` writes modified values.
    pub fn set_autosave(&self, autosave: bool) {
        self.state.lock().autosave = autosave;
    }

    /// Write zlib-compressed files from now on. Reads detect either format.
    pub fn set_compressed(&self, compressed: bool) {
        self.state.lock().compressed = compressed;
    }

    /// Point the store at a different directory.
    pub fn set_data_dir(&self, dir: impl Into<PathBuf>) {
        let mut state = self.state.lock();
        state.data_dir_override = Some(dir.into());
        state.files = None;
    }

    pub fn is_modified(&self) -> bool {
        self.state.lock().modified
    }

    pub fn is_loaded(&self) -> bool {
        self.state.lock().loaded
    }

    // ============================================================================================
    // FILE LOCATIONS
    // ============================================================================================

    /// Directory holding all settings files.
    pub fn data_directory(&self) -> Result<PathBuf> {
        Ok(self.files_locked(&mut self.state.lock())?.data_dir)
    }

    pub fn settings_file(&self) -> Result<PathBuf> {
        Ok(self.files_locked(&mut self.state.lock())?.primary)
    }

    pub fn backup_settings_file(&self) -> Result<PathBuf> {
        Ok(self.files_locked(&mut self.state.lock())?.single_backup)
    }

    pub fn backup_folder(&self) -> Result<PathBuf> {
        Ok(self.files_locked(&mut self.state.lock())?.backup_dir)
    }

    fn files_locked(&self, state: &mut State) -> Result<SettingsFiles> {
        if let Some(ref files) = state.files {
            return Ok(files.clone());
        }

        let dir = match state.data_dir_override {
            Some(ref dir) => dir.clone(),
            None => self.resolver.resolve(&self.app_name)?,
        };
        debug!("Settings directory: {}", dir.display());

        let files = SettingsFiles::new(dir);
        state.files = Some(files.clone());
        Ok(files)
    }

    // ============================================================================================
    // LIFECYCLE
    // ============================================================================================

    /// Load values from disk, falling back to backups when the primary file
    /// is unreadable. Loaded values are merged over anything already put.
    ///
    /// A failed load still counts as loaded, so later saves go through.
    pub fn load(&self) -> Result<()> {
        let outcome = {
            let mut state = self.state.lock();
            state.loaded = true;

            match self.files_locked(&mut state) {
                Ok(files) => {
                    let recovered = LoadPipeline::new(&*self.fs, &files).run();
                    if recovered.source.is_recovery() {
                        info!("Settings recovered from {:?}", recovered.source);
                    }
                    state.values.extend(recovered.store);
                    state.last_load = Some(recovered.source);
                    match recovered.restore_error {
                        Some(e) => Err(e),
                        None => Ok(()),
                    }
                }
                Err(e) => Err(e),
            }
        };

        match outcome {
            Ok(()) => Ok(()),
            Err(e) => self.handle_failure("Error loading settings", e),
        }
    }

    /// Write all values to the primary file, then schedule a backup
    /// rotation if one is due. Does nothing before the first `load()`.
    pub fn save(&self) -> Result<()> {
        self.save_if(|_| true)
    }

    /// Save if `load()` has run, whether or not anything changed.
    pub fn manual_save(&self) -> Result<()> {
        self.save_if(|state| state.loaded)
    }

    /// Save only when values changed and autosave is enabled.
    pub fn autosave(&self) -> Result<()> {
        self.save_if(|state| state.modified && state.autosave)
    }

    fn save_if<F>(&self, should_save: F) -> Result<()>
    where
        F: FnOnce(&State) -> bool,
    {
        let (outcome, job) = {
            let mut state = self.state.lock();
            // never loaded, nothing to save
            if !state.loaded || !should_save(&*state) {
                return Ok(());
            }

            match self.save_locked(&mut state) {
                Ok(job) => {
                    state.modified = false;
                    (Ok(()), job)
                }
                Err(e) => {
                    // A handled failure drops the pending changes. Cleared
                    // here so puts made by the handler stay modified.
                    if state.error_handler.is_some() {
                        state.modified = false;
                    }
                    (Err(e), None)
                }
            }
        };

        if let Some(job) = job {
            self.submit_rotation(job);
        }

        match outcome {
            Ok(()) => Ok(()),
            Err(e) => self.handle_failure("Error writing settings", e),
        }
    }

    fn save_locked(&self, state: &mut State) -> Result<Option<RotationJob>> {
        let files = self.files_locked(state)?;

        let written = codec::encode(&state.values, state.compressed)
            .and_then(|bytes| {
                self.fs
                    .write(&files.primary, &bytes)
                    .map_err(SettingsError::from)
            });

        if let Err(e) = written {
            // A partial write must never be what the next load reads.
            if self.fs.exists(&files.primary) {
                if let Err(rm) = self.fs.remove(&files.primary) {
                    error!(
                        "Failed to delete corrupt settings file {}: {}",
                        files.primary.display(),
                        rm
                    );
                }
            }
            return Err(e);
        }

        // An empty store encodes as an unreadable file; never rotate it in.
        if state.values.is_empty() {
            return Ok(None);
        }
        Ok(state.rotator.schedule(&files, self.clock.now_ms()))
    }

    fn submit_rotation(&self, job: RotationJob) {
        let state = Arc::clone(&self.state);
        let fs = Arc::clone(&self.fs);

        self.runner.submit(Box::new(move || {
            let _guard = state.lock();
            let report = job.run(&*fs);
            debug!(
                "Backup rotation finished: created={:?} pruned={}",
                report.created, report.pruned
            );
        }));
    }

    /// Block until queued backup rotations have finished.
    pub fn flush_backups(&self) {
        self.runner.flush();
    }

    /// Notify the error handler once, or hand the error back when none is
    /// registered.
    fn handle_failure(&self, context: &str, err: SettingsError) -> Result<()> {
        error!("{}: {}", context, err);

        let notify = {
            let mut state = self.state.lock();
            let Some(handler) = state.error_handler.clone() else {
                return Err(err);
            };
            let first = !state.has_errored;
            state.has_errored = true;
            first.then_some(handler)
        };

        if let Some(handler) = notify {
            handler(&err);
        }
        Ok(())
    }

    // ============================================================================================
    // DEFAULTS
    // ============================================================================================

    /// Register a fallback for `key`. Defaults are never written to disk.
    pub fn set_default(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.state.lock().defaults.insert(key.into(), value.into());
    }

    pub fn set_defaults<I, K, V>(&self, defaults: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut state = self.state.lock();
        for (key, value) in defaults {
            state.defaults.insert(key.into(), value.into());
        }
    }

    pub fn get_default(&self, key: &str) -> Option<Value> {
        self.state.lock().defaults.get(key).cloned()
    }

    // ============================================================================================
    // READS
    // ============================================================================================

    pub fn has(&self, key: &str) -> bool {
        self.state.lock().values.contains_key(key)
    }

    /// Raw stored value, ignoring defaults.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.state.lock().values.get(key).cloned()
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.state.lock().values.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.state.lock().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().values.is_empty()
    }

    /// Stored value converted by `extract`, else the registered default.
    fn read_with_default<T>(&self, key: &str, extract: impl Fn(&Value) -> Option<T>) -> Option<T> {
        let state = self.state.lock();
        match state.values.get(key) {
            Some(value) => extract(value),
            None => state.defaults.get(key).and_then(extract),
        }
    }

    fn read_or<T>(&self, key: &str, default: T, extract: impl Fn(&Value) -> Option<T>) -> T {
        self.state
            .lock()
            .values
            .get(key)
            .and_then(extract)
            .unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.read_with_default(key, Value::as_bool).unwrap_or(false)
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.read_or(key, default, Value::as_bool)
    }

    pub fn get_int(&self, key: &str) -> i32 {
        self.read_with_default(key, Value::as_int).unwrap_or(0)
    }

    pub fn get_int_or(&self, key: &str, default: i32) -> i32 {
        self.read_or(key, default, Value::as_int)
    }

    pub fn get_long(&self, key: &str) -> i64 {
        self.read_with_default(key, Value::as_long).unwrap_or(0)
    }

    pub fn get_long_or(&self, key: &str, default: i64) -> i64 {
        self.read_or(key, default, Value::as_long)
    }

    pub fn get_float(&self, key: &str) -> f32 {
        self.read_with_default(key, Value::as_float).unwrap_or(0.0)
    }

    pub fn get_float_or(&self, key: &str, default: f32) -> f32 {
        self.read_or(key, default, Value::as_float)
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.read_with_default(key, |v| v.as_str().map(str::to_string))
    }

    pub fn get_string_or(&self, key: &str, default: &str) -> String {
        self.read_or(key, default.to_string(), |v| v.as_str().map(str::to_string))
    }

    pub fn get_bytes(&self, key: &str) -> Option<Vec<u8>> {
        self.read_with_default(key, |v| v.as_bytes().map(<[u8]>::to_vec))
    }

    pub fn get_bytes_or(&self, key: &str, default: &[u8]) -> Vec<u8> {
        self.read_or(key, default.to_vec(), |v| v.as_bytes().map(<[u8]>::to_vec))
    }

    // ============================================================================================
    // WRITES
    // ============================================================================================

    /// Store a value. The last write wins regardless of the previous type.
    pub fn put(&self, key: impl Into<String>, value: impl Into<Value>) {
        let mut state = self.state.lock();
        state.values.insert(key.into(), value.into());
        state.modified = true;
    }

    /// Store a dynamically typed value, rejecting shapes that have no
    /// tagged variant.
    pub fn put_untyped(&self, key: impl Into<String>, value: serde_json::Value) -> Result<()> {
        let value = Value::try_from(value)?;
        self.put(key, value);
        Ok(())
    }

    pub fn put_all<I, K, V>(&self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut state = self.state.lock();
        for (key, value) in entries {
            state.values.insert(key.into(), value.into());
            state.modified = true;
        }
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut state = self.state.lock();
        state.modified = true;
        state.values.remove(key)
    }

    /// Drop every stored value. Defaults are kept.
    /// Remove every value.
    ///
    /// An empty store is saved as a file that does not load, so a later
    /// `load()` falls back to the single backup or a rotated backup and the
    /// cleared values come back. Remove keys individually to persist an
    /// emptied store.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.values.clear();
        state.modified = true;
    }

    // ============================================================================================
    // ONE-TIME FLAGS
    // ============================================================================================

    /// Returns the stored flag (false if absent) and sets it to true.
    /// Returns false exactly once per key, across restarts once saved.
    pub fn get_bool_once(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        let previous = state
            .values
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        state.values.insert(key.to_string(), Value::Bool(true));
        state.modified = true;
        previous
    }

    /// Run `f` if the flag for `key` has never been set, then set it.
    /// Returns whether `f` ran.
    ///
    /// The flag is only set once `f` returns, so a panicking `f` runs again.
    pub fn run_once<F: FnOnce()>(&self, key: &str, f: F) -> bool {
        let done = self
            .state
            .lock()
            .values
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if done {
            return false;
        }
        f();
        self.put(key, true);
        true
    }

    // ============================================================================================
    // BLOB VALUES
    // ============================================================================================

    /// Serialize `value` through the blob codec and store it as bytes.
    pub fn put_json<T: Serialize + ?Sized>(&self, key: impl Into<String>, value: &T) -> Result<()> {
        let json =
            serde_json::to_value(value).map_err(|e| SettingsError::JsonEncode(e.to_string()))?;
        let bytes = self.blobs.to_bytes(&json)?;
        self.put(key, Value::Bytes(bytes));
        Ok(())
    }

    /// Decode a blob stored by [`Settings::put_json`]. Missing keys and
    /// undecodable blobs yield `default()`.
    pub fn get_json<T, F>(&self, key: &str, default: F) -> T
    where
        T: DeserializeOwned,
        F: FnOnce() -> T,
    {
        let stored = self.state.lock().values.get(key).cloned();
        let Some(Value::Bytes(bytes)) = stored else {
            return default();
        };

        let decoded = self.blobs.from_bytes(&bytes).and_then(|json| {
            serde_json::from_value(json).map_err(|e| SettingsError::JsonDecode(e.to_string()))
        });

        match decoded {
            Ok(value) => value,
            Err(e) => {
                debug!("Falling back to default for blob '{}': {}", key, e);
                default()
            }
        }
    }

    // ============================================================================================
    // STATISTICS
    // ============================================================================================

    pub fn stats(&self) -> SettingsStats {
        let mut state = self.state.lock();
        let backup_files = match self.files_locked(&mut state) {
            Ok(files) => list_backups(&*self.fs, &files.backup_dir).len(),
            Err(_) => 0,
        };

        SettingsStats {
            keys: state.values.len(),
            modified: state.modified,
            loaded: state.loaded,
            last_load: state.last_load.clone(),
            last_backup_at: state.rotator.last_backup_at().unwrap_or(0),
            backup_files,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::InlineRunner;
    use crate::clock::ManualClock;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn create_test_settings(dir: &std::path::Path) -> Settings {
        Settings::builder(SettingsConfig::for_app("test").with_data_dir(dir))
            .runner(Arc::new(InlineRunner))
            .clock(Arc::new(ManualClock::new(1_700_000_000_000)))
            .build()
            .unwrap()
    }

    #[test]
    fn test_typed_accessors() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let settings = create_test_settings(tmp_dir.path());

        settings.put("b", true);
        settings.put("i", 42);
        settings.put("l", 1i64 << 40);
        settings.put("f", 0.5f32);
        settings.put("s", "hello");
        settings.put("x", vec![1u8, 2, 3]);

        assert!(settings.get_bool("b"));
        assert_eq!(settings.get_int("i"), 42);
        assert_eq!(settings.get_long("l"), 1i64 << 40);
        assert_eq!(settings.get_float("f"), 0.5);
        assert_eq!(settings.get_string("s").as_deref(), Some("hello"));
        assert_eq!(settings.get_bytes("x"), Some(vec![1, 2, 3]));
        assert_eq!(settings.len(), 6);
        assert!(settings.is_modified());
    }

    #[test]
    fn test_defaults_and_explicit_fallbacks() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let settings = create_test_settings(tmp_dir.path());

        settings.set_defaults([("fps", 60), ("scale", 2)]);
        settings.set_default("lang", "en");

        assert_eq!(settings.get_int("fps"), 60);
        assert_eq!(settings.get_int_or("fps", 30), 30);
        assert_eq!(settings.get_string("lang").as_deref(), Some("en"));
        assert_eq!(settings.get_int("missing"), 0);
        assert!(!settings.has("fps"));

        settings.put("fps", 144);
        assert_eq!(settings.get_int("fps"), 144);
        assert_eq!(settings.get_default("fps"), Some(Value::Int(60)));
    }

    #[test]
    fn test_type_mismatch_falls_back() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let settings = create_test_settings(tmp_dir.path());

        settings.put("name", "bytes");
        settings.put("name", 42);
        assert_eq!(settings.get("name"), Some(Value::Int(42)));
        assert_eq!(settings.get_string_or("name", "none"), "none");
    }

    #[test]
    fn test_remove_and_clear_mark_modified() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let settings = create_test_settings(tmp_dir.path());
        settings.load().unwrap();

        settings.put("a", 1);
        settings.put("b", 2);
        settings.save().unwrap();
        assert!(!settings.is_modified());

        assert_eq!(settings.remove("a"), Some(Value::Int(1)));
        assert!(settings.is_modified());
        settings.save().unwrap();

        settings.clear();
        assert!(settings.is_modified());
        assert!(settings.is_empty());
    }

    #[test]
    fn test_save_before_load_is_noop() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let settings = create_test_settings(tmp_dir.path());

        settings.put("a", 1);
        settings.save().unwrap();
        assert!(!settings.settings_file().unwrap().exists());
        assert!(settings.is_modified());
    }

    #[test]
    fn test_autosave_respects_switch() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let settings = create_test_settings(tmp_dir.path());
        settings.load().unwrap();

        settings.set_autosave(false);
        settings.put("a", 1);
        settings.autosave().unwrap();
        assert!(!settings.settings_file().unwrap().exists());

        settings.set_autosave(true);
        settings.autosave().unwrap();
        assert!(settings.settings_file().unwrap().exists());
        assert!(!settings.is_modified());
    }

    #[test]
    fn test_get_bool_once() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let settings = create_test_settings(tmp_dir.path());

        assert!(!settings.get_bool_once("intro"));
        assert!(settings.get_bool_once("intro"));
        assert!(settings.get_bool("intro"));
    }

    #[test]
    fn test_run_once() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let settings = create_test_settings(tmp_dir.path());
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            settings.run_once("tutorial", || {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_run_once_panic_leaves_flag_unset() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let settings = create_test_settings(tmp_dir.path());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            settings.run_once("migration", || panic!("migration failed"));
        }));
        assert!(result.is_err());
        assert!(!settings.has("migration"));

        assert!(settings.run_once("migration", || {}));
        assert!(settings.get_bool("migration"));
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Keybinds {
        up: String,
        down: String,
    }

    #[test]
    fn test_json_blob_values() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let settings = create_test_settings(tmp_dir.path());
        let binds = Keybinds {
            up: "W".to_string(),
            down: "S".to_string(),
        };

        settings.put_json("binds", &binds).unwrap();
        assert!(matches!(settings.get("binds"), Some(Value::Bytes(_))));

        let loaded: Keybinds = settings.get_json("binds", || panic!("should decode"));
        assert_eq!(loaded, binds);

        settings.put("binds", vec![0xFFu8, 0x00]);
        let fallback: Keybinds = settings.get_json("binds", || Keybinds {
            up: "Up".to_string(),
            down: "Down".to_string(),
        });
        assert_eq!(fallback.up, "Up");

        let missing: Vec<u32> = settings.get_json("nothing", Vec::new);
        assert!(missing.is_empty());
    }

    #[test]
    fn test_put_untyped() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let settings = create_test_settings(tmp_dir.path());

        settings.put_untyped("n", serde_json::json!(7)).unwrap();
        assert_eq!(settings.get_int("n"), 7);

        let err = settings
            .put_untyped("bad", serde_json::json!({"nested": true}))
            .unwrap_err();
        assert!(matches!(err, SettingsError::InvalidPutType { .. }));
        assert!(!settings.has("bad"));
    }

    #[test]
    fn test_keys_sorted() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let settings = create_test_settings(tmp_dir.path());
        settings.put_all([("b", 1), ("a", 2), ("c", 3)]);
        assert_eq!(settings.keys(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_stats() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let settings = create_test_settings(tmp_dir.path());
        settings.load().unwrap();
        settings.put("a", 1);
        settings.save().unwrap();

        let stats = settings.stats();
        assert_eq!(stats.keys, 1);
        assert!(stats.loaded);
        assert!(!stats.modified);
        assert_eq!(stats.last_load, Some(LoadSource::Fresh));
        assert_eq!(stats.last_backup_at, 1_700_000_000_000);
        assert_eq!(stats.backup_files, 1);
    }
}
