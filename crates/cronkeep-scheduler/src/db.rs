use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `cron_task_status` table (idempotent). One row per task id;
/// rows are created lazily the first time a cycle sees the task and are
/// never deleted by the runner.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS cron_task_status (
            task_id            TEXT    NOT NULL PRIMARY KEY,
            schedule           TEXT    NOT NULL,
            status             TEXT    NOT NULL DEFAULT 'off',
            enabled            INTEGER NOT NULL DEFAULT 1,
            priority           TEXT    NOT NULL DEFAULT 'normal',
            running_instances  INTEGER NOT NULL DEFAULT 0 CHECK (running_instances >= 0),
            last_checked       TEXT,               -- RFC 3339 or NULL
            last_run           TEXT,               -- RFC 3339 or NULL
            is_locked          INTEGER NOT NULL DEFAULT 0,
            locked_at          TEXT,               -- RFC 3339 or NULL
            created_at         TEXT    NOT NULL,
            updated_at         TEXT    NOT NULL
        ) STRICT;
        ",
    )?;
    Ok(())
}

/// Connection settings shared by every process touching the status table.
///
/// WAL lets readers proceed while a cycle writes; the busy timeout makes
/// overlapping invocations queue on the write lock instead of failing.
pub fn configure_connection(conn: &Connection, busy_timeout_ms: u64) -> Result<()> {
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.busy_timeout(std::time::Duration::from_millis(busy_timeout_ms))?;
    Ok(())
}
