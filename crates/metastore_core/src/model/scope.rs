//! Addressing scope for metadata records.
//!
//! A scope is the `(realm, owner_type, owner_id)` triple every store
//! operation filters by. Empty owner fields mean "not attached to an owner".

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Upper bound on each scope field, in characters.
pub const MAX_SCOPE_FIELD_CHARS: usize = 128;

/// Scope validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    EmptyRealm,
    FieldTooLong { field: &'static str, length: usize },
}

impl Display for ScopeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyRealm => write!(f, "realm cannot be empty"),
            Self::FieldTooLong { field, length } => write!(
                f,
                "scope field `{field}` has {length} characters; limit is {MAX_SCOPE_FIELD_CHARS}"
            ),
        }
    }
}

impl Error for ScopeError {}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub realm: String,
    /// Owner discriminator, e.g. a table or entity name.
    #[serde(default)]
    pub owner_type: String,
    #[serde(default)]
    pub owner_id: String,
}

impl Scope {
    /// Scope for `realm` without an owner.
    pub fn new(realm: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            owner_type: String::new(),
            owner_id: String::new(),
        }
    }

    /// Scope for `realm` attached to one owner.
    pub fn owned(
        realm: impl Into<String>,
        owner_type: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            realm: realm.into(),
            owner_type: owner_type.into(),
            owner_id: owner_id.into(),
        }
    }

    /// Returns this scope re-pointed at another owner within the same realm.
    pub fn with_owner(
        mut self,
        owner_type: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Self {
        self.owner_type = owner_type.into();
        self.owner_id = owner_id.into();
        self
    }

    pub fn has_owner(&self) -> bool {
        !self.owner_type.is_empty() || !self.owner_id.is_empty()
    }

    /// Checks the field limits the storage schema enforces.
    pub fn validate(&self) -> Result<(), ScopeError> {
        if self.realm.is_empty() {
            return Err(ScopeError::EmptyRealm);
        }
        for (field, value) in [
            ("realm", &self.realm),
            ("owner_type", &self.owner_type),
            ("owner_id", &self.owner_id),
        ] {
            let length = value.chars().count();
            if length > MAX_SCOPE_FIELD_CHARS {
                return Err(ScopeError::FieldTooLong { field, length });
            }
        }
        Ok(())
    }
}
