//! Persisted metadata row shapes.

use crate::model::scope::Scope;
use crate::model::value::MetaType;
use serde::{Deserialize, Serialize};

/// One stored metadata row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaRecord {
    /// Backend-assigned surrogate id.
    pub id: i64,
    pub scope: Scope,
    pub key: String,
    /// Serialized as `type` to match the column name.
    #[serde(rename = "type")]
    pub kind: MetaType,
    /// Codec payload; `None` for the `null` tag.
    pub value: Option<String>,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    /// Unix epoch milliseconds, refreshed on every update.
    pub updated_at: i64,
}

/// Row about to be inserted; the backend assigns id and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMetaRecord {
    pub scope: Scope,
    pub key: String,
    pub kind: MetaType,
    pub value: Option<String>,
}
