//! Settings configuration and application data directory resolution.

use log::debug;
use std::env;
use std::path::PathBuf;

use crate::backup::BackupPolicy;
use crate::error::{Result, SettingsError};

/// Env var overriding the data directory.
pub const DATA_DIR_ENV: &str = "SETTINGS_DATA_DIR";

/// Env var enabling compressed writes (`1`/`true`/`yes`).
pub const COMPRESS_ENV: &str = "SETTINGS_COMPRESS";

/// Configuration for a settings instance.
#[derive(Debug, Clone)]
pub struct SettingsConfig {
    /// Application name, used to resolve the data directory
    pub app_name: String,

    /// Explicit data directory; skips resolution when set
    pub data_dir: Option<PathBuf>,

    /// Write zlib-compressed settings files
    pub compressed: bool,

    /// Let `autosave()` write when values changed
    pub autosave: bool,

    /// Rotated backup policy
    pub backups: BackupPolicy,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        SettingsConfig {
            app_name: "app".to_string(),
            data_dir: None,
            compressed: false,
            autosave: true,
            backups: BackupPolicy::default(),
        }
    }
}

impl SettingsConfig {
    /// Default configuration for `app_name`.
    pub fn for_app(app_name: impl Into<String>) -> Self {
        SettingsConfig {
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    /// Use `dir` instead of the resolved application data directory.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Apply `SETTINGS_DATA_DIR` and `SETTINGS_COMPRESS` from the environment.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = env::var(DATA_DIR_ENV) {
            if !dir.is_empty() {
                debug!("Using settings directory from {}: {}", DATA_DIR_ENV, dir);
                self.data_dir = Some(PathBuf::from(dir));
            }
        }
        if let Ok(flag) = env::var(COMPRESS_ENV) {
            self.compressed = matches!(flag.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        self
    }
}

// ================================================================================================
// DATA DIRECTORY RESOLUTION
// ================================================================================================

/// Maps an application name to a writable per-user directory.
pub trait DataDirResolver: Send + Sync {
    fn resolve(&self, app_name: &str) -> Result<PathBuf>;
}

/// Platform conventions for per-user application data.
///
/// - Windows: `%APPDATA%\<app>`
/// - macOS: `~/Library/Application Support/<app>`
/// - other: `$XDG_DATA_HOME/<app>`, else `~/.local/share/<app>`
#[derive(Debug, Default, Clone, Copy)]
pub struct OsDataDirResolver;

impl DataDirResolver for OsDataDirResolver {
    fn resolve(&self, app_name: &str) -> Result<PathBuf> {
        let base = if cfg!(target_os = "windows") {
            env_dir("APPDATA")
        } else if cfg!(target_os = "macos") {
            env_dir("HOME").map(|home| home.join("Library").join("Application Support"))
        } else {
            env_dir("XDG_DATA_HOME")
                .or_else(|| env_dir("HOME").map(|home| home.join(".local").join("share")))
        };

        base.map(|dir| dir.join(app_name)).ok_or_else(|| {
            SettingsError::DataDirUnavailable(format!(
                "no home or data directory set for app '{}'",
                app_name
            ))
        })
    }
}

fn env_dir(var: &str) -> Option<PathBuf> {
    env::var_os(var)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}
