use thiserror::Error;

#[derive(Debug, Error)]
pub enum CronhubError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CronhubError {
    /// Short, stable error code for CLI exit messages and log correlation.
    pub fn code(&self) -> &'static str {
        match self {
            CronhubError::Config(_) => "CONFIG_ERROR",
            CronhubError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CronhubError>;
