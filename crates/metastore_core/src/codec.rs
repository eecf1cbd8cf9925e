//! Typed value codec.
//!
//! # Responsibility
//! - Map a `MetaValue` to the `(type, payload)` pair stored in one row.
//! - Map a stored pair back to the exact same `MetaValue`.
//!
//! # Invariants
//! - `decode(encode(v)) == v` for every value `encode` accepts.
//! - Encoding never loses precision: non-finite floats are rejected instead
//!   of being written as something that reads back differently.
//! - Payloads that do not parse for their tag are reported, never coerced.

use crate::model::value::{MetaMap, MetaType, MetaValue};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Encoded form of one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedValue {
    pub kind: MetaType,
    /// `None` only for `MetaType::Null`.
    pub payload: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Value has no lossless stored representation.
    UnsupportedValueType(String),
    /// Stored payload does not parse for its tag.
    InvalidPayload { kind: MetaType, message: String },
}

impl Display for CodecError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedValueType(details) => {
                write!(f, "unsupported value type: {details}")
            }
            Self::InvalidPayload { kind, message } => {
                write!(f, "invalid `{kind}` payload: {message}")
            }
        }
    }
}

impl Error for CodecError {}

/// Encodes a value into its stored `(type, payload)` pair.
pub fn encode(value: &MetaValue) -> Result<EncodedValue, CodecError> {
    let payload = match value {
        MetaValue::Null => None,
        MetaValue::Bool(flag) => Some(if *flag { "1" } else { "0" }.to_string()),
        MetaValue::Int(number) => Some(number.to_string()),
        MetaValue::Float(number) => Some(float_to_number(*number)?.to_string()),
        MetaValue::String(text) => Some(text.clone()),
        MetaValue::List(_) | MetaValue::Map(_) => {
            let json = to_json(value)?;
            Some(serde_json::to_string(&json).map_err(|err| {
                CodecError::UnsupportedValueType(format!("container not serializable: {err}"))
            })?)
        }
    };

    Ok(EncodedValue {
        kind: value.meta_type(),
        payload,
    })
}

/// Decodes a stored `(type, payload)` pair.
pub fn decode(kind: MetaType, payload: Option<&str>) -> Result<MetaValue, CodecError> {
    let text = payload.unwrap_or_default();
    match kind {
        MetaType::Null => Ok(MetaValue::Null),
        MetaType::String => Ok(MetaValue::String(text.to_string())),
        MetaType::Int => text
            .trim()
            .parse::<i64>()
            .map(MetaValue::Int)
            .map_err(|err| invalid_payload(kind, text, err)),
        MetaType::Float => text
            .trim()
            .parse::<f64>()
            .map(MetaValue::Float)
            .map_err(|err| invalid_payload(kind, text, err)),
        MetaType::Bool => Ok(MetaValue::Bool(parse_flag(text))),
        MetaType::Array => {
            let json: serde_json::Value =
                serde_json::from_str(text).map_err(|err| invalid_payload(kind, text, err))?;
            if !json.is_array() && !json.is_object() {
                return Err(CodecError::InvalidPayload {
                    kind,
                    message: "expected a JSON array or object".to_string(),
                });
            }
            from_json(json).map_err(|err| CodecError::InvalidPayload {
                kind,
                message: err.to_string(),
            })
        }
    }
}

/// Converts a value to JSON; fails on non-finite floats anywhere in the tree.
pub fn to_json(value: &MetaValue) -> Result<serde_json::Value, CodecError> {
    Ok(match value {
        MetaValue::Null => serde_json::Value::Null,
        MetaValue::Bool(flag) => serde_json::Value::Bool(*flag),
        MetaValue::Int(number) => serde_json::Value::from(*number),
        MetaValue::Float(number) => serde_json::Value::Number(float_to_number(*number)?),
        MetaValue::String(text) => serde_json::Value::String(text.clone()),
        MetaValue::List(items) => serde_json::Value::Array(
            items.iter().map(to_json).collect::<Result<Vec<_>, _>>()?,
        ),
        MetaValue::Map(entries) => serde_json::Value::Object(
            entries
                .iter()
                .map(|(key, item)| Ok((key.clone(), to_json(item)?)))
                .collect::<Result<serde_json::Map<_, _>, CodecError>>()?,
        ),
    })
}

/// Converts JSON to a value; integers above `i64::MAX` are rejected.
pub fn from_json(value: serde_json::Value) -> Result<MetaValue, CodecError> {
    Ok(match value {
        serde_json::Value::Null => MetaValue::Null,
        serde_json::Value::Bool(flag) => MetaValue::Bool(flag),
        serde_json::Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                MetaValue::Int(int)
            } else if number.is_u64() {
                return Err(CodecError::UnsupportedValueType(format!(
                    "integer {number} exceeds the signed 64-bit range"
                )));
            } else {
                let float = number.as_f64().ok_or_else(|| {
                    CodecError::UnsupportedValueType(format!(
                        "number {number} is not representable"
                    ))
                })?;
                MetaValue::Float(float)
            }
        }
        serde_json::Value::String(text) => MetaValue::String(text),
        serde_json::Value::Array(items) => MetaValue::List(
            items
                .into_iter()
                .map(from_json)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        serde_json::Value::Object(entries) => MetaValue::Map(
            entries
                .into_iter()
                .map(|(key, item)| Ok((key, from_json(item)?)))
                .collect::<Result<MetaMap, CodecError>>()?,
        ),
    })
}

impl TryFrom<serde_json::Value> for MetaValue {
    type Error = CodecError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        from_json(value)
    }
}

fn float_to_number(value: f64) -> Result<serde_json::Number, CodecError> {
    serde_json::Number::from_f64(value)
        .ok_or_else(|| CodecError::UnsupportedValueType(format!("non-finite float {value}")))
}

fn parse_flag(text: &str) -> bool {
    let trimmed = text.trim();
    !(trimmed.is_empty() || trimmed == "0" || trimmed.eq_ignore_ascii_case("false"))
}

fn invalid_payload(kind: MetaType, text: &str, err: impl Display) -> CodecError {
    CodecError::InvalidPayload {
        kind,
        message: format!("`{text}`: {err}"),
    }
}
