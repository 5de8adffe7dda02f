//! Database migrations for resync

use rusqlite::{Connection, TransactionBehavior};

use crate::error::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Run all migrations
///
/// The version check and every pending migration share one IMMEDIATE
/// transaction, so processes opening a fresh file together apply each
/// version exactly once.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version = schema_version(&tx)?;

    if current_version < 1 {
        migrate_v1(&tx)?;
    }

    if current_version < 2 {
        migrate_v2(&tx)?;
    }

    tx.commit()?;
    Ok(())
}

/// Highest applied schema version (0 for a fresh database)
pub fn schema_version(conn: &Connection) -> Result<i32> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?)
}

/// Initial schema (v1)
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- One committed position per scope
        CREATE TABLE IF NOT EXISTS sync_state (
            scope TEXT PRIMARY KEY,
            last_watermark_ts TEXT,
            last_watermark_cursor TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        -- Run history, append-only
        CREATE TABLE IF NOT EXISTS sync_jobs (
            run_id TEXT PRIMARY KEY,
            scope TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('running', 'success', 'error')),
            started_at TEXT NOT NULL,
            heartbeat_at TEXT,
            finished_at TEXT,
            from_watermark_ts TEXT,
            from_watermark_cursor TEXT,
            progress_watermark_ts TEXT,
            progress_watermark_cursor TEXT,
            error TEXT,
            FOREIGN KEY (scope) REFERENCES sync_state(scope) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_sync_jobs_scope_started
            ON sync_jobs(scope, started_at DESC);

        -- Lifecycle transitions
        CREATE TABLE IF NOT EXISTS sync_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            scope TEXT NOT NULL,
            run_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            at TEXT NOT NULL,
            detail TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_sync_events_scope ON sync_events(scope, id DESC);

        INSERT INTO schema_version (version) VALUES (1);
        "#,
    )?;

    Ok(())
}

/// At most one running job per scope, enforced by the database (v2)
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_jobs_one_running
            ON sync_jobs(scope) WHERE status = 'running';

        INSERT INTO schema_version (version) VALUES (2);
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        run_migrations(&mut conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_second_running_job_rejected_by_index() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        conn.execute_batch(
            "INSERT INTO sync_state (scope, created_at, updated_at) VALUES ('orders', 't', 't');
             INSERT INTO sync_jobs (run_id, scope, status, started_at) VALUES ('a', 'orders', 'running', 't');
             INSERT INTO sync_jobs (run_id, scope, status, started_at) VALUES ('b', 'orders', 'success', 't');",
        )
        .unwrap();

        let dup = conn.execute(
            "INSERT INTO sync_jobs (run_id, scope, status, started_at) VALUES ('c', 'orders', 'running', 't')",
            [],
        );
        assert!(dup.is_err());
    }
}
