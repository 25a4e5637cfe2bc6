use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
    types::{LogEntry, NewLogEntry, NewTask, RunStatus, Task},
};

/// Durable storage for cron tasks and their run log.
///
/// Every method is a single statement, so each call is atomic at the row
/// level. Storage failures are returned, never swallowed: the manager treats
/// them as fatal for the current pass.
pub trait TaskRepository: Send + Sync {
    /// Tasks with `scheduled_at <= now`, ordered by `scheduled_at`, then `id`.
    fn due_tasks(&self, now: i64) -> Result<Vec<Task>>;

    fn insert_task(&self, task: NewTask) -> Result<Task>;

    /// Overwrite the task row with the same id.
    fn update_task(&self, task: &Task) -> Result<()>;

    /// Compare-and-swap on `scheduled_at`: succeeds only if the row still has
    /// the `scheduled_at` the caller observed.
    ///
    /// `Some(next)` moves the task to `next`; `None` deletes it. Returns
    /// `false` when another caller already claimed this occurrence.
    fn claim_task(&self, task: &Task, next_scheduled_at: Option<i64>) -> Result<bool>;

    fn delete_task(&self, id: i64) -> Result<()>;

    /// Delete every task for `hook`; returns how many were removed.
    fn delete_tasks_by_hook(&self, hook: &str) -> Result<usize>;

    fn get_task(&self, id: i64) -> Result<Option<Task>>;

    /// All tasks, soonest first.
    fn list_tasks(&self) -> Result<Vec<Task>>;

    fn insert_log(&self, entry: NewLogEntry) -> Result<LogEntry>;

    /// Earliest pending `scheduled_at` for `hook`.
    fn next_scheduled(&self, hook: &str) -> Result<Option<i64>>;

    /// Latest `finished_at` among successful runs of `hook`.
    fn last_run(&self, hook: &str) -> Result<Option<i64>>;

    /// Most recent log rows, newest first, optionally filtered by hook.
    fn recent_logs(&self, hook: Option<&str>, limit: usize) -> Result<Vec<LogEntry>>;
}

const TASK_COLUMNS: &str = "id, hook, args, scheduled_at, interval_seconds";
const LOG_COLUMNS: &str = "id, task_id, hook, status, started_at, finished_at, message";

type TaskRow = (i64, String, String, i64, Option<i64>);
type LogRow = (i64, Option<i64>, String, String, i64, i64, Option<String>);

fn read_task_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok((
        row.get(0)?, // id
        row.get(1)?, // hook
        row.get(2)?, // args JSON
        row.get(3)?, // scheduled_at
        row.get(4)?, // interval_seconds
    ))
}

fn task_from_row((id, hook, args, scheduled_at, interval_seconds): TaskRow) -> Result<Task> {
    let args: Vec<Value> = serde_json::from_str(&args)?;
    Ok(Task {
        id,
        hook,
        args,
        scheduled_at,
        interval_seconds,
    })
}

fn read_log_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LogRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn log_from_row(
    (id, task_id, hook, status, started_at, finished_at, message): LogRow,
) -> Result<LogEntry> {
    let status: RunStatus = status.parse().map_err(SchedulerError::InvalidRecord)?;
    Ok(LogEntry {
        id,
        task_id,
        hook,
        status,
        started_at,
        finished_at,
        message,
    })
}

/// SQLite-backed [`TaskRepository`].
///
/// Several processes may open the same database file; the conditional
/// statements in [`TaskRepository::claim_task`] keep them from running the
/// same occurrence twice.
pub struct SqliteTaskRepository {
    conn: Mutex<Connection>,
}

impl SqliteTaskRepository {
    /// Wrap `conn`, creating the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| SchedulerError::LockPoisoned)
    }

    fn query_tasks(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Task>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt
            .query_map(params, read_task_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(task_from_row).collect()
    }
}

impl TaskRepository for SqliteTaskRepository {
    fn due_tasks(&self, now: i64) -> Result<Vec<Task>> {
        self.query_tasks(
            &format!(
                "SELECT {TASK_COLUMNS} FROM cron_tasks
                 WHERE scheduled_at <= ?1
                 ORDER BY scheduled_at, id"
            ),
            [now],
        )
    }

    fn insert_task(&self, task: NewTask) -> Result<Task> {
        let args_json = serde_json::to_string(&task.args)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO cron_tasks (hook, args, scheduled_at, interval_seconds)
             VALUES (?1, ?2, ?3, ?4)",
            params![task.hook, args_json, task.scheduled_at, task.interval_seconds],
        )?;
        let id = conn.last_insert_rowid();
        info!(task_id = id, hook = %task.hook, scheduled_at = task.scheduled_at, "task inserted");
        Ok(Task {
            id,
            hook: task.hook,
            args: task.args,
            scheduled_at: task.scheduled_at,
            interval_seconds: task.interval_seconds,
        })
    }

    fn update_task(&self, task: &Task) -> Result<()> {
        let args_json = serde_json::to_string(&task.args)?;
        let n = self.conn()?.execute(
            "UPDATE cron_tasks SET hook = ?1, args = ?2, scheduled_at = ?3, interval_seconds = ?4
             WHERE id = ?5",
            params![task.hook, args_json, task.scheduled_at, task.interval_seconds, task.id],
        )?;
        if n == 0 {
            return Err(SchedulerError::TaskNotFound { id: task.id });
        }
        Ok(())
    }

    fn claim_task(&self, task: &Task, next_scheduled_at: Option<i64>) -> Result<bool> {
        let conn = self.conn()?;
        let n = match next_scheduled_at {
            Some(next) => conn.execute(
                "UPDATE cron_tasks SET scheduled_at = ?1 WHERE id = ?2 AND scheduled_at = ?3",
                params![next, task.id, task.scheduled_at],
            )?,
            None => conn.execute(
                "DELETE FROM cron_tasks WHERE id = ?1 AND scheduled_at = ?2",
                params![task.id, task.scheduled_at],
            )?,
        };
        debug!(task_id = task.id, claimed = n == 1, "claim attempted");
        Ok(n == 1)
    }

    fn delete_task(&self, id: i64) -> Result<()> {
        let n = self
            .conn()?
            .execute("DELETE FROM cron_tasks WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(SchedulerError::TaskNotFound { id });
        }
        info!(task_id = id, "task deleted");
        Ok(())
    }

    fn delete_tasks_by_hook(&self, hook: &str) -> Result<usize> {
        let n = self
            .conn()?
            .execute("DELETE FROM cron_tasks WHERE hook = ?1", [hook])?;
        info!(hook, count = n, "tasks deleted for hook");
        Ok(n)
    }

    fn get_task(&self, id: i64) -> Result<Option<Task>> {
        let row = self
            .conn()?
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM cron_tasks WHERE id = ?1"),
                [id],
                read_task_row,
            )
            .optional()?;
        row.map(task_from_row).transpose()
    }

    fn list_tasks(&self) -> Result<Vec<Task>> {
        self.query_tasks(
            &format!("SELECT {TASK_COLUMNS} FROM cron_tasks ORDER BY scheduled_at, id"),
            [],
        )
    }

    fn insert_log(&self, entry: NewLogEntry) -> Result<LogEntry> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO cron_log (task_id, hook, status, started_at, finished_at, message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.task_id,
                entry.hook,
                entry.status.to_string(),
                entry.started_at,
                entry.finished_at,
                entry.message,
            ],
        )?;
        Ok(LogEntry {
            id: conn.last_insert_rowid(),
            task_id: entry.task_id,
            hook: entry.hook,
            status: entry.status,
            started_at: entry.started_at,
            finished_at: entry.finished_at,
            message: entry.message,
        })
    }

    fn next_scheduled(&self, hook: &str) -> Result<Option<i64>> {
        let ts = self.conn()?.query_row(
            "SELECT MIN(scheduled_at) FROM cron_tasks WHERE hook = ?1",
            [hook],
            |row| row.get::<_, Option<i64>>(0),
        )?;
        Ok(ts)
    }

    fn last_run(&self, hook: &str) -> Result<Option<i64>> {
        // MAX over zero rows yields a single NULL row.
        let ts = self.conn()?.query_row(
            "SELECT MAX(finished_at) FROM cron_log WHERE hook = ?1 AND status = 'success'",
            [hook],
            |row| row.get::<_, Option<i64>>(0),
        )?;
        Ok(ts)
    }

    fn recent_logs(&self, hook: Option<&str>, limit: usize) -> Result<Vec<LogEntry>> {
        let conn = self.conn()?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = match hook {
            Some(hook) => {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {LOG_COLUMNS} FROM cron_log WHERE hook = ?1 ORDER BY id DESC LIMIT ?2"
                ))?;
                let rows = stmt
                    .query_map(params![hook, limit], read_log_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {LOG_COLUMNS} FROM cron_log ORDER BY id DESC LIMIT ?1"
                ))?;
                let rows = stmt
                    .query_map([limit], read_log_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };
        rows.into_iter().map(log_from_row).collect()
    }
}
