//! Per-table migration registry and executor.
//!
//! # Responsibility
//! - Register metadata table migrations in strictly increasing order.
//! - Apply pending migrations for one table atomically.
//!
//! # Invariants
//! - `version` values must remain monotonic.
//! - The applied version of each table lives in `metastore_schema_versions`,
//!   so several metadata tables can share one database file.
//! - Table names are matched case-insensitively there, the way SQLite
//!   resolves identifiers.

use crate::config::{quote_identifier, validate_table_name};
use crate::db::{DbError, DbResult};
use rusqlite::{params, Connection, OptionalExtension};

pub use crate::config::VERSIONS_TABLE;

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    /// SQL template; `{table}` is replaced by the quoted table identifier and
    /// `{table_name}` by the bare name, for deriving index names.
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: include_str!("0001_create_metadata.sql"),
    },
    Migration {
        version: 2,
        sql: include_str!("0002_realm_key_index.sql"),
    },
];

/// Returns the latest migration version known by this binary.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Applies all pending migrations for `table` on the provided connection.
pub fn apply_migrations(conn: &mut Connection, table: &str) -> DbResult<()> {
    validate_table_name(table)?;
    ensure_versions_table(conn)?;

    let current_version = table_version(conn, table)?;
    let latest = latest_version();

    if current_version > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            table: table.to_string(),
            db_version: current_version,
            latest_supported: latest,
        });
    }

    if current_version == latest {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        tx.execute_batch(&render(migration.sql, table))?;
    }
    tx.execute(
        &format!(
            "INSERT INTO {VERSIONS_TABLE} (table_name, version) VALUES (?1, ?2)
             ON CONFLICT(table_name) DO UPDATE SET version = excluded.version;"
        ),
        params![table, latest],
    )?;
    tx.commit()?;

    Ok(())
}

/// Returns the applied migration version for `table`, `0` when never migrated.
pub fn table_version(conn: &Connection, table: &str) -> DbResult<u32> {
    ensure_versions_table(conn)?;
    let version = conn
        .query_row(
            &format!("SELECT version FROM {VERSIONS_TABLE} WHERE table_name = ?1;"),
            [table],
            |row| row.get::<_, u32>(0),
        )
        .optional()?;
    Ok(version.unwrap_or(0))
}

fn ensure_versions_table(conn: &Connection) -> DbResult<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {VERSIONS_TABLE} (
            table_name TEXT PRIMARY KEY NOT NULL COLLATE NOCASE,
            version INTEGER NOT NULL
        );"
    ))?;
    Ok(())
}

fn render(template: &str, table: &str) -> String {
    template
        .replace("{table_name}", table)
        .replace("{table}", &quote_identifier(table))
}
