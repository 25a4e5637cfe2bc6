use thiserror::Error;

#[derive(Debug, Error)]
pub enum HookError {
    /// The callback ran and reported a failure.
    #[error("{0}")]
    ExecutionFailed(String),

    /// The callback received arguments it cannot work with.
    #[error("invalid hook arguments: {0}")]
    InvalidArguments(String),
}

impl HookError {
    pub fn failed(msg: impl Into<String>) -> Self {
        HookError::ExecutionFailed(msg.into())
    }
}

impl From<serde_json::Error> for HookError {
    fn from(e: serde_json::Error) -> Self {
        HookError::InvalidArguments(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HookError>;
