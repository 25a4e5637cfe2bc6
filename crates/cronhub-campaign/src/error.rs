use thiserror::Error;

#[derive(Debug, Error)]
pub enum CampaignError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("invalid campaign schedule: {0}")]
    InvalidSchedule(String),

    #[error("campaign not found: {id}")]
    CampaignNotFound { id: i64 },

    #[error("campaign schedule not found: {id}")]
    ScheduleNotFound { id: i64 },

    #[error("campaign {campaign_id} already has an active schedule")]
    AlreadyScheduled { campaign_id: i64 },

    #[error("invalid stored record: {0}")]
    InvalidRecord(String),

    #[error("campaign store lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, CampaignError>;
