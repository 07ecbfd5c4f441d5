//! Versioned schema for the device-local key-value store.

use crate::error::CryptoError;
use rusqlite::Connection;

const MIGRATIONS: &[(i32, &str)] = &[(1, MIGRATION_001)];

const MIGRATION_001: &str = "
CREATE TABLE IF NOT EXISTS local_storage (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
";

pub fn run_migrations(conn: &Connection) -> Result<(), CryptoError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _local_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _local_migrations",
        [],
        |row| row.get(0),
    )?;

    for &(version, sql) in MIGRATIONS {
        if version > current_version {
            let tx = conn.unchecked_transaction()?;
            tx.execute_batch(sql)?;
            tx.execute(
                "INSERT INTO _local_migrations (version) VALUES (?1)",
                [version],
            )?;
            tx.commit()?;
            tracing::debug!(version, "applied local storage migration");
        }
    }

    Ok(())
}
