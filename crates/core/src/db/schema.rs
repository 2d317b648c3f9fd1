//! Database schema definitions and migration runner.
//!
//! Migrations are plain SQL strings applied in order. The SQLite
//! `user_version` pragma tracks which ones have already been applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order: `(version, description, sql)`.
static MIGRATIONS: &[(u32, &str, &str)] = &[(
    1,
    "identities table",
    r#"
    CREATE TABLE IF NOT EXISTS identities (
        identity_id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id     INTEGER NOT NULL,
        email       TEXT    NOT NULL,
        name        TEXT    NOT NULL DEFAULT '',
        standard    INTEGER NOT NULL DEFAULT 0,
        created_at  TEXT    NOT NULL,
        changed_at  TEXT    NOT NULL
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_identities_user_email
        ON identities (user_id, email);
    "#,
)];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_schema_version(conn)?;
    info!(
        current_version,
        target_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied");
        }
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}
