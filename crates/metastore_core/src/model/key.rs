//! Metadata key validation.
//!
//! # Invariants
//! - Keys are strings or integers at the boundary and strings in storage.
//! - A key never exceeds `MAX_KEY_CHARS` characters.

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Upper bound on key length, in characters.
pub const MAX_KEY_CHARS: usize = 128;

/// Key validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    TooLong { length: usize },
    /// Dynamic input was neither a string nor an integer.
    InvalidType(&'static str),
}

impl Display for KeyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooLong { length } => write!(
                f,
                "invalid key length {length}; keys must be at most {MAX_KEY_CHARS} characters"
            ),
            Self::InvalidType(found) => {
                write!(f, "invalid key type `{found}`; allowed: string, integer")
            }
        }
    }
}

impl Error for KeyError {}

/// A validated metadata key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetaKey(String);

impl MetaKey {
    /// Validates `value` as a key.
    pub fn parse(value: impl Into<String>) -> Result<Self, KeyError> {
        let value = value.into();
        let length = value.chars().count();
        if length > MAX_KEY_CHARS {
            return Err(KeyError::TooLong { length });
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl Display for MetaKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Conversion accepted wherever a store operation takes a key.
pub trait IntoMetaKey {
    fn into_meta_key(self) -> Result<MetaKey, KeyError>;
}

impl IntoMetaKey for MetaKey {
    fn into_meta_key(self) -> Result<MetaKey, KeyError> {
        Ok(self)
    }
}

impl IntoMetaKey for &MetaKey {
    fn into_meta_key(self) -> Result<MetaKey, KeyError> {
        Ok(self.clone())
    }
}

impl IntoMetaKey for &str {
    fn into_meta_key(self) -> Result<MetaKey, KeyError> {
        MetaKey::parse(self)
    }
}

impl IntoMetaKey for String {
    fn into_meta_key(self) -> Result<MetaKey, KeyError> {
        MetaKey::parse(self)
    }
}

impl IntoMetaKey for &String {
    fn into_meta_key(self) -> Result<MetaKey, KeyError> {
        MetaKey::parse(self.as_str())
    }
}

macro_rules! integer_keys {
    ($($ty:ty),*) => {
        $(
            impl IntoMetaKey for $ty {
                fn into_meta_key(self) -> Result<MetaKey, KeyError> {
                    Ok(MetaKey(self.to_string()))
                }
            }
        )*
    };
}

integer_keys!(i32, i64, u32, u64, usize);

impl IntoMetaKey for &serde_json::Value {
    fn into_meta_key(self) -> Result<MetaKey, KeyError> {
        match self {
            serde_json::Value::String(value) => MetaKey::parse(value.as_str()),
            serde_json::Value::Number(number) if number.is_i64() || number.is_u64() => {
                Ok(MetaKey(number.to_string()))
            }
            serde_json::Value::Number(_) => Err(KeyError::InvalidType("float")),
            serde_json::Value::Null => Err(KeyError::InvalidType("null")),
            serde_json::Value::Bool(_) => Err(KeyError::InvalidType("bool")),
            serde_json::Value::Array(_) => Err(KeyError::InvalidType("array")),
            serde_json::Value::Object(_) => Err(KeyError::InvalidType("object")),
        }
    }
}

impl IntoMetaKey for serde_json::Value {
    fn into_meta_key(self) -> Result<MetaKey, KeyError> {
        (&self).into_meta_key()
    }
}
