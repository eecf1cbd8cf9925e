//! Metadata repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Provide the row-level operations `MetaStore` needs, each filtered by an
//!   exact `(realm, metable_type, metable_id)` scope.
//! - Keep SQL details and wildcard translation inside the persistence
//!   boundary.
//!
//! # Invariants
//! - Listings are ordered by `key` ascending (binary collation).
//! - Unique constraint violations surface as `RepoError::UniqueViolation`.
//! - Read paths reject rows with unknown type tags instead of masking them.

use crate::config::{quote_identifier, validate_table_name};
use crate::db::DbError;
use crate::model::record::{MetaRecord, NewMetaRecord};
use crate::model::scope::Scope;
use crate::model::value::MetaType;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};

const REQUIRED_COLUMNS: &[&str] = &[
    "id",
    "realm",
    "metable_type",
    "metable_id",
    "key",
    "value",
    "type",
    "created_at",
    "updated_at",
];

/// Current time as epoch milliseconds, evaluated by SQLite.
const NOW_MILLIS_SQL: &str = "CAST(ROUND((julianday('now') - 2440587.5) * 86400000) AS INTEGER)";

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    /// Insert or update collided with the scope+key uniqueness constraint.
    UniqueViolation(String),
    /// Row id no longer exists.
    NotFound(i64),
    MissingRequiredTable(String),
    MissingRequiredColumn {
        table: String,
        column: &'static str,
    },
    /// Persisted data cannot be converted to a valid record or value.
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::UniqueViolation(message) => write!(f, "unique constraint violated: {message}"),
            Self::NotFound(id) => write!(f, "metadata row not found: {id}"),
            Self::MissingRequiredTable(table) => {
                write!(f, "metadata repository requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "metadata repository requires column `{column}` in table `{table}`"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted metadata: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, message) = &value {
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE {
                return Self::UniqueViolation(
                    message.clone().unwrap_or_else(|| failure.to_string()),
                );
            }
        }
        Self::Db(DbError::Sqlite(value))
    }
}

/// Key restriction applied on top of the scope filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyFilter {
    All,
    Keys(Vec<String>),
    /// Wildcard pattern where `*` matches any run of characters.
    Pattern(String),
}

/// Storage backend consumed by `MetaStore`.
pub trait MetaRepository {
    fn find_one(&self, scope: &Scope, key: &str) -> RepoResult<Option<MetaRecord>>;
    fn find_many(&self, scope: &Scope, filter: &KeyFilter) -> RepoResult<Vec<MetaRecord>>;
    /// Inserts a row and returns its id.
    fn insert(&self, record: &NewMetaRecord) -> RepoResult<i64>;
    /// Rewrites scope, key, value and type of the row with `record.id`.
    fn update(&self, record: &MetaRecord) -> RepoResult<()>;
    fn delete_many(&self, scope: &Scope, filter: &KeyFilter) -> RepoResult<usize>;
    fn count(&self, scope: &Scope) -> RepoResult<u64>;
}

/// SQLite-backed metadata repository bound to one table.
pub struct SqliteMetaRepository<'conn> {
    conn: &'conn Connection,
    table: String,
    quoted_table: String,
}

impl<'conn> SqliteMetaRepository<'conn> {
    /// Binds to `table`, checking it exists with every required column.
    pub fn try_new(conn: &'conn Connection, table: impl Into<String>) -> RepoResult<Self> {
        let table = table.into();
        validate_table_name(&table).map_err(DbError::from)?;
        ensure_connection_ready(conn, &table)?;
        let quoted_table = quote_identifier(&table);
        Ok(Self {
            conn,
            table,
            quoted_table,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn select_sql(&self) -> String {
        format!(
            "SELECT id, realm, metable_type, metable_id, \"key\", \"value\", type, created_at, updated_at
             FROM {}
             WHERE realm = ?1 AND metable_type = ?2 AND metable_id = ?3",
            self.quoted_table
        )
    }
}

impl MetaRepository for SqliteMetaRepository<'_> {
    fn find_one(&self, scope: &Scope, key: &str) -> RepoResult<Option<MetaRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} AND \"key\" = ?4;", self.select_sql()))?;
        let mut rows = stmt.query(params![
            scope.realm.as_str(),
            scope.owner_type.as_str(),
            scope.owner_id.as_str(),
            key
        ])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_record_row(row)?));
        }
        Ok(None)
    }

    fn find_many(&self, scope: &Scope, filter: &KeyFilter) -> RepoResult<Vec<MetaRecord>> {
        let Some((clause, key_values)) = key_clause(filter) else {
            return Ok(Vec::new());
        };
        let bind_values = scope_values(scope).into_iter().chain(key_values);

        let sql = format!("{}{clause} ORDER BY \"key\" ASC;", self.select_sql());
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_record_row(row)?);
        }
        Ok(records)
    }

    fn insert(&self, record: &NewMetaRecord) -> RepoResult<i64> {
        self.conn.execute(
            &format!(
                "INSERT INTO {} (realm, metable_type, metable_id, \"key\", \"value\", type)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
                self.quoted_table
            ),
            params![
                record.scope.realm.as_str(),
                record.scope.owner_type.as_str(),
                record.scope.owner_id.as_str(),
                record.key.as_str(),
                record.value.as_deref(),
                record.kind.as_str(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update(&self, record: &MetaRecord) -> RepoResult<()> {
        let changed = self.conn.execute(
            &format!(
                "UPDATE {}
                 SET
                    realm = ?1,
                    metable_type = ?2,
                    metable_id = ?3,
                    \"key\" = ?4,
                    \"value\" = ?5,
                    type = ?6,
                    updated_at = ({NOW_MILLIS_SQL})
                 WHERE id = ?7;",
                self.quoted_table
            ),
            params![
                record.scope.realm.as_str(),
                record.scope.owner_type.as_str(),
                record.scope.owner_id.as_str(),
                record.key.as_str(),
                record.value.as_deref(),
                record.kind.as_str(),
                record.id,
            ],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(record.id));
        }
        Ok(())
    }

    fn delete_many(&self, scope: &Scope, filter: &KeyFilter) -> RepoResult<usize> {
        let Some((clause, key_values)) = key_clause(filter) else {
            return Ok(0);
        };
        let bind_values = scope_values(scope).into_iter().chain(key_values);

        let sql = format!(
            "DELETE FROM {} WHERE realm = ?1 AND metable_type = ?2 AND metable_id = ?3{clause};",
            self.quoted_table
        );
        Ok(self.conn.execute(&sql, params_from_iter(bind_values))?)
    }

    fn count(&self, scope: &Scope) -> RepoResult<u64> {
        let count: i64 = self.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {}
                 WHERE realm = ?1 AND metable_type = ?2 AND metable_id = ?3;",
                self.quoted_table
            ),
            params![
                scope.realm.as_str(),
                scope.owner_type.as_str(),
                scope.owner_id.as_str()
            ],
            |row| row.get(0),
        )?;
        u64::try_from(count)
            .map_err(|_| RepoError::InvalidData(format!("negative row count {count}")))
    }
}

/// Translates a `*` wildcard pattern to a SQLite GLOB pattern.
///
/// `?` and `[` are GLOB metacharacters and are bracketed so they match
/// literally; `]` is literal outside a bracket expression.
pub fn wildcard_to_glob(pattern: &str) -> String {
    let mut glob = String::with_capacity(pattern.len());
    for ch in pattern.chars() {
        match ch {
            '?' => glob.push_str("[?]"),
            '[' => glob.push_str("[[]"),
            other => glob.push(other),
        }
    }
    glob
}

fn scope_values(scope: &Scope) -> [Value; 3] {
    [
        Value::Text(scope.realm.clone()),
        Value::Text(scope.owner_type.clone()),
        Value::Text(scope.owner_id.clone()),
    ]
}

/// Returns the SQL suffix and its bind values, or `None` when the filter can
/// match nothing.
fn key_clause(filter: &KeyFilter) -> Option<(String, Vec<Value>)> {
    match filter {
        KeyFilter::All => Some((String::new(), Vec::new())),
        KeyFilter::Keys(keys) if keys.is_empty() => None,
        KeyFilter::Keys(keys) => {
            let placeholders = (0..keys.len())
                .map(|index| format!("?{}", index + 4))
                .collect::<Vec<_>>()
                .join(", ");
            let values = keys.iter().cloned().map(Value::Text).collect();
            Some((format!(" AND \"key\" IN ({placeholders})"), values))
        }
        KeyFilter::Pattern(pattern) => Some((
            " AND \"key\" GLOB ?4".to_string(),
            vec![Value::Text(wildcard_to_glob(pattern))],
        )),
    }
}

fn parse_record_row(row: &Row<'_>) -> RepoResult<MetaRecord> {
    let type_text: String = row.get("type")?;
    let kind = MetaType::parse(&type_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid type tag `{type_text}` in metadata.type"))
    })?;

    Ok(MetaRecord {
        id: row.get("id")?,
        scope: Scope {
            realm: row.get("realm")?,
            owner_type: row.get("metable_type")?,
            owner_id: row.get("metable_id")?,
        },
        key: row.get("key")?,
        kind,
        value: row.get("value")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn ensure_connection_ready(conn: &Connection, table: &str) -> RepoResult<()> {
    if !table_exists(conn, table)? {
        return Err(RepoError::MissingRequiredTable(table.to_string()));
    }
    for column in REQUIRED_COLUMNS {
        if !table_has_column(conn, table, column)? {
            return Err(RepoError::MissingRequiredColumn {
                table: table.to_string(),
                column,
            });
        }
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1 COLLATE NOCASE
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> RepoResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", quote_identifier(table)))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}
