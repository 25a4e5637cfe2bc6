use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates `cron_tasks` and the append-only `cron_log` (idempotent).
/// `cron_log.task_id` has no foreign key: one-shot tasks are deleted before
/// their log row is written.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS cron_tasks (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            hook             TEXT    NOT NULL,
            args             TEXT    NOT NULL DEFAULT '[]',  -- JSON array
            scheduled_at     INTEGER NOT NULL,               -- epoch seconds
            interval_seconds INTEGER                         -- NULL means one-shot
        ) STRICT;

        -- Polling: SELECT … WHERE scheduled_at <= ? ORDER BY scheduled_at, id
        CREATE INDEX IF NOT EXISTS idx_cron_tasks_due ON cron_tasks (scheduled_at, id);
        CREATE INDEX IF NOT EXISTS idx_cron_tasks_hook ON cron_tasks (hook);

        CREATE TABLE IF NOT EXISTS cron_log (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id     INTEGER,
            hook        TEXT    NOT NULL,
            status      TEXT    NOT NULL CHECK (status IN ('success', 'failure')),
            started_at  INTEGER NOT NULL,
            finished_at INTEGER NOT NULL,
            message     TEXT
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_cron_log_last_run
            ON cron_log (hook, status, finished_at);
        ",
    )?;
    Ok(())
}
