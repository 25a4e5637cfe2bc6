use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Task arguments could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The provided schedule definition is invalid.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// A stored row holds a value this version cannot decode.
    #[error("Invalid stored record: {0}")]
    InvalidRecord(String),

    /// No task with the given ID exists in the store.
    #[error("Task not found: {id}")]
    TaskNotFound { id: i64 },

    /// A thread panicked while holding the connection lock.
    #[error("Task store lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
