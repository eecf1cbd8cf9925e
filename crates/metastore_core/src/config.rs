//! Store configuration.
//!
//! # Responsibility
//! - Carry the default realm and metadata table name into storage bootstrap
//!   and `MetaStore` construction.
//!
//! # Invariants
//! - A validated table name is a plain SQL identifier that is not reserved
//!   by SQLite or by the migration bookkeeping. Statements interpolate it
//!   through `quote_identifier`.
//! - There is no process-wide configuration; callers pass it explicitly.

use crate::model::scope::MAX_SCOPE_FIELD_CHARS;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const DEFAULT_REALM: &str = "default";
pub const DEFAULT_TABLE_NAME: &str = "metadata";

/// Bookkeeping table recording the applied schema version per metadata table.
pub const VERSIONS_TABLE: &str = "metastore_schema_versions";

static TABLE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,63}$").expect("valid table name regex"));

#[derive(Debug)]
pub enum ConfigError {
    EmptyRealm,
    RealmTooLong(usize),
    InvalidTableName(String),
    /// Name collides with SQLite internals or the version bookkeeping table.
    ReservedTableName(String),
    Parse(serde_json::Error),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyRealm => write!(f, "default realm cannot be empty"),
            Self::RealmTooLong(length) => write!(
                f,
                "default realm has {length} characters; limit is {MAX_SCOPE_FIELD_CHARS}"
            ),
            Self::InvalidTableName(name) => write!(
                f,
                "invalid table name `{name}`; expected letters, digits and underscores"
            ),
            Self::ReservedTableName(name) => write!(f, "table name `{name}` is reserved"),
            Self::Parse(err) => write!(f, "invalid store config: {err}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            _ => None,
        }
    }
}

/// Settings consumed by the store and its SQLite backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Realm used when callers do not name one.
    pub default_realm: String,
    /// Metadata table; only the storage backend reads this.
    pub table_name: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_realm: DEFAULT_REALM.to_string(),
            table_name: DEFAULT_TABLE_NAME.to_string(),
        }
    }
}

impl StoreConfig {
    /// Parses and validates a JSON config document. Missing fields take defaults.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(input).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_default_realm(mut self, realm: impl Into<String>) -> Self {
        self.default_realm = realm.into();
        self
    }

    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_realm.is_empty() {
            return Err(ConfigError::EmptyRealm);
        }
        let realm_length = self.default_realm.chars().count();
        if realm_length > MAX_SCOPE_FIELD_CHARS {
            return Err(ConfigError::RealmTooLong(realm_length));
        }
        validate_table_name(&self.table_name)
    }
}

/// Checks that `name` can be used as a SQLite table identifier.
///
/// SQLite compares identifiers case-insensitively, so reserved names are
/// matched the same way.
pub fn validate_table_name(name: &str) -> Result<(), ConfigError> {
    if !TABLE_NAME_RE.is_match(name) {
        return Err(ConfigError::InvalidTableName(name.to_string()));
    }
    let lowered = name.to_ascii_lowercase();
    if lowered == VERSIONS_TABLE || lowered.starts_with("sqlite_") {
        return Err(ConfigError::ReservedTableName(name.to_string()));
    }
    Ok(())
}

/// Wraps a validated identifier in double quotes so keywords such as
/// `order` stay usable as table names.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{name}\"")
}
