use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates `recurring_jobs` and `recurring_job_executions` (idempotent).
/// Executions reference their job and are removed with it.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS recurring_jobs (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            name            TEXT    NOT NULL UNIQUE,
            job_key         TEXT    NOT NULL,
            function_name   TEXT    NOT NULL,
            cron_expression TEXT    NOT NULL,
            args            TEXT    NOT NULL DEFAULT '',   -- opaque JSON blob
            times           INTEGER NOT NULL DEFAULT 0,    -- 0 means unbounded
            times_run       INTEGER NOT NULL DEFAULT 0,
            status          TEXT    NOT NULL DEFAULT 'active',
            error_count     INTEGER NOT NULL DEFAULT 0,
            last_error      TEXT    NOT NULL DEFAULT '',
            last_run_at     TEXT,
            next_run_at     TEXT,
            created_at      TEXT    NOT NULL,
            updated_at      TEXT    NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_recurring_jobs_status ON recurring_jobs (status);

        CREATE TABLE IF NOT EXISTS recurring_job_executions (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            recurring_job_id INTEGER NOT NULL
                             REFERENCES recurring_jobs (id) ON DELETE CASCADE,
            started_at       TEXT    NOT NULL,
            finished_at      TEXT,               -- NULL while running
            success          INTEGER NOT NULL DEFAULT 0,
            error            TEXT    NOT NULL DEFAULT '',
            output           TEXT    NOT NULL DEFAULT '',
            duration_ms      INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_executions_job_started
            ON recurring_job_executions (recurring_job_id, started_at);
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master
                 WHERE type = 'table' AND name LIKE 'recurring_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }
}
