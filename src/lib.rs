//! # settings-store
//!
//! Crash-tolerant typed key-value settings persisted to a local file.
//!
//! - **storage**: binary codec, filesystem access, file layout
//! - **recovery**: load with fallback to the single backup and rotated backups
//! - **backup**: rate-limited snapshot rotation on a background worker
//! - **settings**: the `Settings` facade tying it all together
//!
//! ```rust,no_run
//! use settings_store::{Settings, SettingsConfig};
//!
//! let settings = Settings::new(SettingsConfig::for_app("my-game"))?;
//! settings.load()?;
//! settings.put("volume", 0.8f32);
//! settings.save()?;
//! # Ok::<(), settings_store::SettingsError>(())
//! ```

pub mod backup;
pub mod blob;
pub mod clock;
pub mod config;
pub mod error;
pub mod recovery;
pub mod settings;
pub mod storage;
pub mod types;

pub use backup::{BackgroundTaskRunner, BackupPolicy, InlineRunner, SequentialWorker};
pub use blob::{BlobCodec, JsonBlobCodec};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DataDirResolver, OsDataDirResolver, SettingsConfig};
pub use error::{Result, SettingsError};
pub use settings::{Settings, SettingsBuilder};
pub use storage::{FileSystem, LoadSource, LocalFileSystem, SettingsStats};
pub use types::{Store, Value, ValueType};
