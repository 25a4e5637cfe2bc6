use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A persisted cron task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Row id, assigned on insert.
    pub id: i64,
    /// Name of the hook to invoke.
    pub hook: String,
    /// Positional arguments for the hook callbacks (stored as a JSON array).
    pub args: Vec<Value>,
    /// Earliest epoch second at which the task may run.
    pub scheduled_at: i64,
    /// `Some(n)` repeats every `n` seconds; `None` runs once.
    pub interval_seconds: Option<i64>,
}

impl Task {
    pub fn is_recurring(&self) -> bool {
        self.interval_seconds.is_some()
    }
}

/// A task that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub hook: String,
    pub args: Vec<Value>,
    pub scheduled_at: i64,
    pub interval_seconds: Option<i64>,
}

/// Outcome of one hook invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failure,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Success => "success",
            RunStatus::Failure => "failure",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "success" => Ok(RunStatus::Success),
            "failure" => Ok(RunStatus::Failure),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// One row of the append-only run log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    /// Task that produced the entry; `None` for ad hoc runs.
    pub task_id: Option<i64>,
    /// Copied from the task so history survives task deletion.
    pub hook: String,
    pub status: RunStatus,
    pub started_at: i64,
    pub finished_at: i64,
    /// Error text on failure.
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewLogEntry {
    pub task_id: Option<i64>,
    pub hook: String,
    pub status: RunStatus,
    pub started_at: i64,
    pub finished_at: i64,
    pub message: Option<String>,
}
