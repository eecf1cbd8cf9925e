//! Dynamic metadata value model.
//!
//! # Responsibility
//! - Represent every value shape the store can persist in one tagged union.
//! - Name the persisted type tags that drive decoding.
//!
//! # Invariants
//! - Lists and maps share the `array` tag; JSON shape tells them apart.
//! - `MetaType::as_str` output is the only tag text written to storage.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Key-ordered mapping returned by listing operations.
pub type MetaMap = BTreeMap<String, MetaValue>;

/// Persisted type tag stored beside every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetaType {
    Null,
    String,
    Int,
    Float,
    Bool,
    /// JSON-encoded list or map.
    Array,
}

impl MetaType {
    /// Returns the canonical tag text used in the `type` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Array => "array",
        }
    }

    /// Parses a stored tag, accepting the long-form aliases older tables used.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "null" => Some(Self::Null),
            "string" => Some(Self::String),
            "int" | "integer" => Some(Self::Int),
            "float" | "double" | "real" => Some(Self::Float),
            "bool" | "boolean" => Some(Self::Bool),
            "array" => Some(Self::Array),
            _ => None,
        }
    }
}

impl Display for MetaType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dynamically typed metadata value.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum MetaValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<MetaValue>),
    Map(MetaMap),
}

impl MetaValue {
    /// Returns the tag this value is stored under.
    pub fn meta_type(&self) -> MetaType {
        match self {
            Self::Null => MetaType::Null,
            Self::Bool(_) => MetaType::Bool,
            Self::Int(_) => MetaType::Int,
            Self::Float(_) => MetaType::Float,
            Self::String(_) => MetaType::String,
            Self::List(_) | Self::Map(_) => MetaType::Array,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&MetaMap> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }
}

impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for MetaValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for MetaValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for MetaValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for MetaValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<f32> for MetaValue {
    fn from(value: f32) -> Self {
        Self::Float(f64::from(value))
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl<T: Into<MetaValue>> From<Vec<T>> for MetaValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<MetaValue>> From<BTreeMap<String, T>> for MetaValue {
    fn from(values: BTreeMap<String, T>) -> Self {
        Self::Map(
            values
                .into_iter()
                .map(|(key, value)| (key, value.into()))
                .collect(),
        )
    }
}

impl<T: Into<MetaValue>> From<Option<T>> for MetaValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}
