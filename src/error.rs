//! Error taxonomy for the settings store.

use std::io;

/// Errors from encoding, decoding, file access and value conversion.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// Declared entry count was zero or negative.
    #[error("corrupt settings header: entry count {count} is not allowed")]
    CorruptHeader { count: i32 },

    /// Type tag outside the known set.
    #[error("unknown value type tag: {tag}")]
    UnknownTypeTag { tag: u8 },

    /// Bytes remained after the declared entries were read.
    #[error("trailing settings data; expected EOF, but got byte {byte}")]
    TrailingData { byte: u8 },

    /// Underlying read/write failure, including truncated input.
    #[error("settings I/O error: {0}")]
    Io(#[from] io::Error),

    /// A dynamically typed value has no matching tagged variant.
    #[error("invalid value stored: {found}")]
    InvalidPutType { found: String },

    /// Opaque blob could not be decoded.
    #[error("failed to decode blob value: {0}")]
    JsonDecode(String),

    /// Value could not be encoded into an opaque blob.
    #[error("failed to encode blob value: {0}")]
    JsonEncode(String),

    /// Key or string value exceeds the u16 length prefix.
    #[error("string of {len} bytes exceeds the 65535 byte limit")]
    StringTooLong { len: usize },

    /// No application data directory could be determined.
    #[error("application data directory unavailable: {0}")]
    DataDirUnavailable(String),
}

impl SettingsError {
    /// True for errors that indicate an unreadable or damaged settings file.
    pub fn is_corruption(&self) -> bool {
        match self {
            SettingsError::CorruptHeader { .. }
            | SettingsError::UnknownTypeTag { .. }
            | SettingsError::TrailingData { .. } => true,
            SettingsError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData
            ),
            _ => false,
        }
    }
}

/// Crate result alias.
pub type Result<T> = std::result::Result<T, SettingsError>;
