//! Core value types shared by the codec, the recovery pipeline and the facade.

use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::SettingsError;

/// In-memory settings map: key → tagged value.
pub type Store = HashMap<String, Value>;

/// Current wall-clock time in milliseconds since UNIX epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ================================================================================================
// VALUE TYPE TAGS
// ================================================================================================

/// On-disk type tag written before every payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueType {
    Bool = 0,
    Int = 1,
    Long = 2,
    Float = 3,
    String = 4,
    Bytes = 5,
}

impl ValueType {
    /// Tag byte for this type.
    #[inline]
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Parse a tag byte read from disk.
    pub fn from_tag(tag: u8) -> Result<Self, SettingsError> {
        match tag {
            0 => Ok(ValueType::Bool),
            1 => Ok(ValueType::Int),
            2 => Ok(ValueType::Long),
            3 => Ok(ValueType::Float),
            4 => Ok(ValueType::String),
            5 => Ok(ValueType::Bytes),
            other => Err(SettingsError::UnknownTypeTag { tag: other }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Long => "long",
            ValueType::Float => "float",
            ValueType::String => "string",
            ValueType::Bytes => "bytes",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ================================================================================================
// TAGGED VALUE
// ================================================================================================

/// A single stored setting. Every key holds exactly one of these.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    String(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// Type tag of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Long(_) => ValueType::Long,
            Value::Float(_) => ValueType::Float,
            Value::String(_) => ValueType::String,
            Value::Bytes(_) => ValueType::Bytes,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

/// Conversion for dynamically-typed input (e.g. values parsed from a JSON
/// config file). Only shapes that map onto one of the six variants are
/// accepted.
impl TryFrom<serde_json::Value> for Value {
    type Error = SettingsError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        use serde_json::Value as Json;

        match value {
            Json::Bool(b) => Ok(Value::Bool(b)),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(match i32::try_from(i) {
                        Ok(small) => Value::Int(small),
                        Err(_) => Value::Long(i),
                    })
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Float(f as f32))
                } else {
                    Err(SettingsError::InvalidPutType {
                        found: "unsigned integer out of i64 range".to_string(),
                    })
                }
            }
            Json::String(s) => Ok(Value::String(s)),
            Json::Array(items) => {
                let mut bytes = Vec::with_capacity(items.len());
                for item in &items {
                    match item.as_u64().and_then(|b| u8::try_from(b).ok()) {
                        Some(b) => bytes.push(b),
                        None => {
                            return Err(SettingsError::InvalidPutType {
                                found: "array with non-byte elements".to_string(),
                            })
                        }
                    }
                }
                Ok(Value::Bytes(bytes))
            }
            Json::Null => Err(SettingsError::InvalidPutType {
                found: "null".to_string(),
            }),
            Json::Object(_) => Err(SettingsError::InvalidPutType {
                found: "object".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tag_round_trip() {
        for tag in 0u8..6 {
            let ty = ValueType::from_tag(tag).unwrap();
            assert_eq!(ty.tag(), tag);
        }
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let err = ValueType::from_tag(6).unwrap_err();
        assert!(matches!(err, SettingsError::UnknownTypeTag { tag: 6 }));
    }

    #[test]
    fn test_value_from_primitives() {
        assert_eq!(Value::from(true).value_type(), ValueType::Bool);
        assert_eq!(Value::from(7i32).value_type(), ValueType::Int);
        assert_eq!(Value::from(7i64).value_type(), ValueType::Long);
        assert_eq!(Value::from(0.5f32).value_type(), ValueType::Float);
        assert_eq!(Value::from("x").value_type(), ValueType::String);
        assert_eq!(Value::from(vec![1u8, 2]).value_type(), ValueType::Bytes);
    }

    #[test]
    fn test_untyped_conversion() {
        assert_eq!(Value::try_from(json!(true)).unwrap(), Value::Bool(true));
        assert_eq!(Value::try_from(json!(42)).unwrap(), Value::Int(42));
        assert_eq!(
            Value::try_from(json!(5_000_000_000i64)).unwrap(),
            Value::Long(5_000_000_000)
        );
        assert_eq!(Value::try_from(json!(0.25)).unwrap(), Value::Float(0.25));
        assert_eq!(
            Value::try_from(json!([1, 2, 255])).unwrap(),
            Value::Bytes(vec![1, 2, 255])
        );
    }

    #[test]
    fn test_untyped_conversion_rejects_unsupported_shapes() {
        for bad in [json!(null), json!({"a": 1}), json!([1, 300]), json!(["x"])] {
            let err = Value::try_from(bad).unwrap_err();
            assert!(matches!(err, SettingsError::InvalidPutType { .. }));
        }
    }
}
