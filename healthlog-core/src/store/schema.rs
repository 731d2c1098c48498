//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: Daily records
    r#"
    -- One row per calendar day; the record itself is stored as JSON so the
    -- shape matches what the sync server sends and receives.
    CREATE TABLE IF NOT EXISTS daily_records (
        date             TEXT PRIMARY KEY,
        record           JSON NOT NULL,
        has_content      INTEGER NOT NULL DEFAULT 0,
        last_modified    DATETIME,
        updated_at       DATETIME NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_daily_records_content ON daily_records(has_content, date);
    "#,
    // Version 2: Sync outbox and suggestion history
    r#"
    -- Patches that failed to reach the sync server, at most one per date
    CREATE TABLE IF NOT EXISTS sync_outbox (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        date             TEXT NOT NULL UNIQUE,
        patch            JSON NOT NULL,
        attempts         INTEGER NOT NULL DEFAULT 1,
        last_error       TEXT,
        created_at       DATETIME NOT NULL
    );

    -- Last finalized suggestion set per analysis date
    CREATE TABLE IF NOT EXISTS suggestion_records (
        date             TEXT PRIMARY KEY,
        record           JSON NOT NULL,
        generated_at     DATETIME NOT NULL
    );
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        // Run migrations twice - should be idempotent
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        for table in ["daily_records", "sync_outbox", "suggestion_records"] {
            let exists: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "Table {} should exist", table);
        }
    }
}
