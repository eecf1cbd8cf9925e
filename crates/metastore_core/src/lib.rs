//! Typed, realm-scoped key-value metadata stored in SQLite.
//!
//! Values of any supported shape are encoded to a `(type, text)` pair by
//! [`codec`] and addressed by `(realm, owner_type, owner_id, key)`.

pub mod codec;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use codec::{decode, encode, CodecError, EncodedValue};
pub use config::{ConfigError, StoreConfig};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::key::{IntoMetaKey, KeyError, MetaKey, MAX_KEY_CHARS};
pub use model::record::{MetaRecord, NewMetaRecord};
pub use model::scope::{Scope, ScopeError};
pub use model::value::{MetaMap, MetaType, MetaValue};
pub use repo::meta_repo::{KeyFilter, MetaRepository, RepoError, RepoResult, SqliteMetaRepository};
pub use service::meta_store::{MetaError, MetaResult, MetaStore};
