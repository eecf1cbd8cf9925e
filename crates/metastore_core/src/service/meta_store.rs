//! Scoped metadata store.
//!
//! # Responsibility
//! - Expose set/create/update/get/exists/count/all/keys/remove/purge/query
//!   over any `MetaRepository`.
//! - Run every stored value through the codec on write and read.
//!
//! # Invariants
//! - Every operation names its scope explicitly; the configured default realm
//!   only seeds `default_scope`/`owner_scope`.
//! - Reads treat a miss (including a key that could never be stored) as a
//!   normal outcome.
//! - Log events carry key lengths and type tags, never keys or values.

use crate::codec::{self, CodecError};
use crate::config::StoreConfig;
use crate::model::key::{IntoMetaKey, KeyError, MetaKey};
use crate::model::record::{MetaRecord, NewMetaRecord};
use crate::model::scope::{Scope, ScopeError};
use crate::model::value::{MetaMap, MetaValue};
use crate::repo::meta_repo::{KeyFilter, MetaRepository, RepoError};
use log::{debug, error, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type MetaResult<T> = Result<T, MetaError>;

/// Failures surfaced by `MetaStore` operations.
#[derive(Debug)]
pub enum MetaError {
    InvalidKey(KeyError),
    InvalidScope(ScopeError),
    UnsupportedValueType(String),
    /// `create` found a record at the scope+key.
    AlreadyExists { key: String },
    /// `update` found no record at the scope+key.
    NotFound { key: String },
    Storage(RepoError),
}

impl Display for MetaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidKey(err) => write!(f, "{err}"),
            Self::InvalidScope(err) => write!(f, "{err}"),
            Self::UnsupportedValueType(details) => {
                write!(f, "unsupported value type: {details}")
            }
            Self::AlreadyExists { key } => {
                write!(f, "can't create meta (key: {key}); meta already exists")
            }
            Self::NotFound { key } => {
                write!(f, "can't update meta (key: {key}); meta doesn't exist")
            }
            Self::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl Error for MetaError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidKey(err) => Some(err),
            Self::InvalidScope(err) => Some(err),
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<KeyError> for MetaError {
    fn from(value: KeyError) -> Self {
        Self::InvalidKey(value)
    }
}

impl From<ScopeError> for MetaError {
    fn from(value: ScopeError) -> Self {
        Self::InvalidScope(value)
    }
}

impl From<RepoError> for MetaError {
    fn from(value: RepoError) -> Self {
        Self::Storage(value)
    }
}

impl From<CodecError> for MetaError {
    fn from(value: CodecError) -> Self {
        match value {
            CodecError::UnsupportedValueType(details) => Self::UnsupportedValueType(details),
            invalid @ CodecError::InvalidPayload { .. } => {
                Self::Storage(RepoError::InvalidData(invalid.to_string()))
            }
        }
    }
}

/// Typed key-value metadata store over a repository backend.
pub struct MetaStore<R: MetaRepository> {
    repo: R,
    default_realm: String,
}

impl<R: MetaRepository> MetaStore<R> {
    /// Creates a store whose default scopes use `config.default_realm`.
    pub fn new(repo: R, config: &StoreConfig) -> Self {
        Self {
            repo,
            default_realm: config.default_realm.clone(),
        }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn default_realm(&self) -> &str {
        &self.default_realm
    }

    /// Default realm, no owner.
    pub fn default_scope(&self) -> Scope {
        Scope::new(self.default_realm.as_str())
    }

    /// Default realm, attached to the given owner.
    pub fn owner_scope(&self, owner_type: impl Into<String>, owner_id: impl Into<String>) -> Scope {
        Scope::owned(self.default_realm.as_str(), owner_type, owner_id)
    }

    /// Stores `value` at `key`, overwriting any existing record.
    pub fn set(
        &self,
        scope: &Scope,
        key: impl IntoMetaKey,
        value: impl Into<MetaValue>,
    ) -> MetaResult<()> {
        let (key, encoded) = prepare_write("meta_set", scope, key, &value.into())?;

        match self.repo.find_one(scope, key.as_str())? {
            Some(mut record) => {
                record.scope = scope.clone();
                record.kind = encoded.kind;
                record.value = encoded.payload;
                self.repo.update(&record).map_err(storage_failure("meta_set"))?;
                debug!(
                    "event=meta_set module=service status=ok action=update type={} key_len={}",
                    record.kind,
                    key.as_str().len()
                );
            }
            None => {
                let kind = encoded.kind;
                self.repo
                    .insert(&new_record(scope, key.as_str(), encoded))
                    .map_err(storage_failure("meta_set"))?;
                debug!(
                    "event=meta_set module=service status=ok action=insert type={kind} key_len={}",
                    key.as_str().len()
                );
            }
        }
        Ok(())
    }

    /// Stores `value` at `key`; fails with `AlreadyExists` when present.
    pub fn create(
        &self,
        scope: &Scope,
        key: impl IntoMetaKey,
        value: impl Into<MetaValue>,
    ) -> MetaResult<()> {
        let (key, encoded) = prepare_write("meta_create", scope, key, &value.into())?;

        if self.repo.find_one(scope, key.as_str())?.is_some() {
            return Err(already_exists(key));
        }

        let kind = encoded.kind;
        match self.repo.insert(&new_record(scope, key.as_str(), encoded)) {
            Ok(_) => {
                debug!(
                    "event=meta_create module=service status=ok type={kind} key_len={}",
                    key.as_str().len()
                );
                Ok(())
            }
            // Lost a race with a concurrent writer between lookup and insert.
            Err(RepoError::UniqueViolation(_)) => Err(already_exists(key)),
            Err(err) => Err(storage_failure("meta_create")(err)),
        }
    }

    /// Replaces the value at `key`; fails with `NotFound` when absent.
    pub fn update(
        &self,
        scope: &Scope,
        key: impl IntoMetaKey,
        value: impl Into<MetaValue>,
    ) -> MetaResult<()> {
        let (key, encoded) = prepare_write("meta_update", scope, key, &value.into())?;

        let Some(mut record) = self.repo.find_one(scope, key.as_str())? else {
            warn!(
                "event=meta_update module=service status=error error_code=not_found key_len={}",
                key.as_str().len()
            );
            return Err(MetaError::NotFound {
                key: key.into_string(),
            });
        };

        record.scope = scope.clone();
        record.kind = encoded.kind;
        record.value = encoded.payload;
        self.repo
            .update(&record)
            .map_err(storage_failure("meta_update"))?;
        debug!(
            "event=meta_update module=service status=ok type={} key_len={}",
            record.kind,
            key.as_str().len()
        );
        Ok(())
    }

    /// Returns the value at `key`, or `default` when there is none.
    pub fn get(
        &self,
        scope: &Scope,
        key: impl IntoMetaKey,
        default: impl Into<MetaValue>,
    ) -> MetaResult<MetaValue> {
        Ok(self.find(scope, key)?.unwrap_or_else(|| default.into()))
    }

    /// Returns the value at `key` if a record exists.
    pub fn find(&self, scope: &Scope, key: impl IntoMetaKey) -> MetaResult<Option<MetaValue>> {
        let Some(key) = lookup_key(key) else {
            return Ok(None);
        };
        match self.repo.find_one(scope, key.as_str())? {
            Some(record) => Ok(Some(decode_record(&record)?)),
            None => Ok(None),
        }
    }

    pub fn exists(&self, scope: &Scope, key: impl IntoMetaKey) -> MetaResult<bool> {
        let Some(key) = lookup_key(key) else {
            return Ok(false);
        };
        Ok(self.repo.find_one(scope, key.as_str())?.is_some())
    }

    /// Number of records in `scope`.
    pub fn count(&self, scope: &Scope) -> MetaResult<u64> {
        Ok(self.repo.count(scope)?)
    }

    /// Every record in `scope`, ordered by key.
    pub fn all(&self, scope: &Scope) -> MetaResult<MetaMap> {
        let records = self.repo.find_many(scope, &KeyFilter::All)?;
        decode_records(&records)
    }

    /// Keys in `scope`, ascending.
    pub fn keys(&self, scope: &Scope) -> MetaResult<Vec<String>> {
        Ok(self
            .repo
            .find_many(scope, &KeyFilter::All)?
            .into_iter()
            .map(|record| record.key)
            .collect())
    }

    /// Deletes the listed keys in `scope`; absent keys are ignored.
    ///
    /// Returns the number of records deleted.
    pub fn remove<K: IntoMetaKey>(
        &self,
        scope: &Scope,
        keys: impl IntoIterator<Item = K>,
    ) -> MetaResult<usize> {
        let keys: Vec<String> = keys
            .into_iter()
            .filter_map(lookup_key)
            .map(MetaKey::into_string)
            .collect();
        let requested = keys.len();
        let deleted = self
            .repo
            .delete_many(scope, &KeyFilter::Keys(keys))
            .map_err(storage_failure("meta_remove"))?;
        debug!(
            "event=meta_remove module=service status=ok requested={requested} deleted={deleted}"
        );
        Ok(deleted)
    }

    /// Deletes every record in `scope` and returns how many were removed.
    pub fn purge(&self, scope: &Scope) -> MetaResult<usize> {
        let deleted = self
            .repo
            .delete_many(scope, &KeyFilter::All)
            .map_err(storage_failure("meta_purge"))?;
        debug!(
            "event=meta_purge module=service status=ok owner={} deleted={deleted}",
            scope.has_owner()
        );
        Ok(deleted)
    }

    /// Returns a `MetaValue::Map` of the records whose key matches `pattern`
    /// (`*` matches any run of characters), or `default` when nothing matches.
    pub fn query(
        &self,
        scope: &Scope,
        pattern: &str,
        default: impl Into<MetaValue>,
    ) -> MetaResult<MetaValue> {
        let records = self
            .repo
            .find_many(scope, &KeyFilter::Pattern(pattern.to_string()))?;
        if records.is_empty() {
            return Ok(default.into());
        }
        Ok(MetaValue::Map(decode_records(&records)?))
    }
}

fn prepare_write(
    event: &'static str,
    scope: &Scope,
    key: impl IntoMetaKey,
    value: &MetaValue,
) -> MetaResult<(MetaKey, codec::EncodedValue)> {
    scope.validate().map_err(|err| {
        warn!("event={event} module=service status=error error_code=invalid_scope error={err}");
        MetaError::from(err)
    })?;
    let key = key.into_meta_key().map_err(|err| {
        warn!("event={event} module=service status=error error_code=invalid_key error={err}");
        MetaError::from(err)
    })?;
    let encoded = codec::encode(value).map_err(|err| {
        warn!(
            "event={event} module=service status=error error_code=unsupported_value type={}",
            value.meta_type()
        );
        MetaError::from(err)
    })?;
    Ok((key, encoded))
}

fn new_record(scope: &Scope, key: &str, encoded: codec::EncodedValue) -> NewMetaRecord {
    NewMetaRecord {
        scope: scope.clone(),
        key: key.to_string(),
        kind: encoded.kind,
        value: encoded.payload,
    }
}

fn lookup_key(key: impl IntoMetaKey) -> Option<MetaKey> {
    match key.into_meta_key() {
        Ok(key) => Some(key),
        Err(err) => {
            debug!("event=meta_lookup module=service status=skip reason=invalid_key error={err}");
            None
        }
    }
}

fn already_exists(key: MetaKey) -> MetaError {
    warn!(
        "event=meta_create module=service status=error error_code=already_exists key_len={}",
        key.as_str().len()
    );
    MetaError::AlreadyExists {
        key: key.into_string(),
    }
}

fn storage_failure(event: &'static str) -> impl Fn(RepoError) -> MetaError {
    move |err| {
        error!("event={event} module=service status=error error_code=storage error={err}");
        MetaError::Storage(err)
    }
}

fn decode_record(record: &MetaRecord) -> MetaResult<MetaValue> {
    codec::decode(record.kind, record.value.as_deref()).map_err(|err| {
        error!(
            "event=meta_decode module=service status=error error_code=invalid_payload id={} error={err}",
            record.id
        );
        MetaError::from(err)
    })
}

fn decode_records(records: &[MetaRecord]) -> MetaResult<MetaMap> {
    records
        .iter()
        .map(|record| Ok((record.key.clone(), decode_record(record)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{MetaError, MetaStore};
    use crate::config::StoreConfig;
    use crate::model::record::{MetaRecord, NewMetaRecord};
    use crate::model::scope::Scope;
    use crate::repo::meta_repo::{KeyFilter, MetaRepository, RepoError, RepoResult};
    use std::cell::Cell;

    /// Backend whose lookups always miss, simulating a concurrent writer
    /// that inserts between `find_one` and `insert`.
    struct RacingRepository {
        inserts: Cell<usize>,
    }

    impl MetaRepository for RacingRepository {
        fn find_one(&self, _scope: &Scope, _key: &str) -> RepoResult<Option<MetaRecord>> {
            Ok(None)
        }

        fn find_many(&self, _scope: &Scope, _filter: &KeyFilter) -> RepoResult<Vec<MetaRecord>> {
            Ok(Vec::new())
        }

        fn insert(&self, _record: &NewMetaRecord) -> RepoResult<i64> {
            self.inserts.set(self.inserts.get() + 1);
            Err(RepoError::UniqueViolation(
                "UNIQUE constraint failed".to_string(),
            ))
        }

        fn update(&self, record: &MetaRecord) -> RepoResult<()> {
            Err(RepoError::NotFound(record.id))
        }

        fn delete_many(&self, _scope: &Scope, _filter: &KeyFilter) -> RepoResult<usize> {
            Ok(0)
        }

        fn count(&self, _scope: &Scope) -> RepoResult<u64> {
            Ok(0)
        }
    }

    fn racing_store() -> MetaStore<RacingRepository> {
        MetaStore::new(
            RacingRepository {
                inserts: Cell::new(0),
            },
            &StoreConfig::default(),
        )
    }

    #[test]
    fn create_translates_unique_violation_to_already_exists() {
        let store = racing_store();
        let scope = store.default_scope();

        let err = store.create(&scope, "race", 1).unwrap_err();
        assert!(matches!(err, MetaError::AlreadyExists { ref key } if key == "race"));
        assert_eq!(store.repository().inserts.get(), 1);
    }

    #[test]
    fn set_surfaces_unique_violation_as_storage_error() {
        let store = racing_store();
        let scope = store.default_scope();

        let err = store.set(&scope, "race", 1).unwrap_err();
        assert!(matches!(
            err,
            MetaError::Storage(RepoError::UniqueViolation(_))
        ));
    }

    #[test]
    fn write_validation_happens_before_any_backend_call() {
        let store = racing_store();

        let long_key = "k".repeat(129);
        assert!(matches!(
            store.set(&store.default_scope(), long_key.as_str(), 1),
            Err(MetaError::InvalidKey(_))
        ));
        assert!(matches!(
            store.create(&Scope::new(""), "k", 1),
            Err(MetaError::InvalidScope(_))
        ));
        assert!(matches!(
            store.update(&store.default_scope(), "k", f64::NAN),
            Err(MetaError::UnsupportedValueType(_))
        ));
        assert_eq!(store.repository().inserts.get(), 0);
    }

    #[test]
    fn default_scopes_use_configured_realm() {
        let config = StoreConfig::default().with_default_realm("billing");
        let store = MetaStore::new(
            RacingRepository {
                inserts: Cell::new(0),
            },
            &config,
        );
        assert_eq!(store.default_scope(), Scope::new("billing"));
        assert_eq!(
            store.owner_scope("invoices", "42"),
            Scope::owned("billing", "invoices", "42")
        );
    }
}
