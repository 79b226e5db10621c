//! Opaque blob codec for structured values stored under a single key.
//!
//! The facade treats blob contents as opaque bytes; this trait is the only
//! place that knows their format.

use crate::error::{Result, SettingsError};

/// Structured value ↔ byte blob conversion.
pub trait BlobCodec: Send + Sync {
    fn to_bytes(&self, value: &serde_json::Value) -> Result<Vec<u8>>;

    fn from_bytes(&self, bytes: &[u8]) -> Result<serde_json::Value>;
}

/// Stores blobs as compact JSON text.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonBlobCodec;

impl BlobCodec for JsonBlobCodec {
    fn to_bytes(&self, value: &serde_json::Value) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| SettingsError::JsonEncode(e.to_string()))
    }

    fn from_bytes(&self, bytes: &[u8]) -> Result<serde_json::Value> {
        serde_json::from_slice(bytes).map_err(|e| SettingsError::JsonDecode(e.to_string()))
    }
}
