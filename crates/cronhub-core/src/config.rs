use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_SLOW_HOOK_WARN_SECS: i64 = 30;
pub const DEFAULT_CAMPAIGN_BATCH_SIZE: u32 = 50;
pub const DEFAULT_CAMPAIGN_CLAIM_LEASE_SECS: i64 = 3600;

/// Top-level config (cronhub.toml + CRONHUB_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CronhubConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub campaign: CampaignConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Settings for the cron trigger loop and the task manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Seconds between two `run_due_tasks` passes in daemon mode.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Hooks running longer than this are reported with a warning.
    #[serde(default = "default_slow_hook_warn")]
    pub slow_hook_warn_secs: i64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            slow_hook_warn_secs: DEFAULT_SLOW_HOOK_WARN_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// Recipients handled per campaign run.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// A run still marked `running` after this long is treated as abandoned.
    #[serde(default = "default_claim_lease")]
    pub claim_lease_secs: i64,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_CAMPAIGN_BATCH_SIZE,
            claim_lease_secs: DEFAULT_CAMPAIGN_CLAIM_LEASE_SECS,
        }
    }
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_slow_hook_warn() -> i64 {
    DEFAULT_SLOW_HOOK_WARN_SECS
}
fn default_batch_size() -> u32 {
    DEFAULT_CAMPAIGN_BATCH_SIZE
}
fn default_claim_lease() -> i64 {
    DEFAULT_CAMPAIGN_CLAIM_LEASE_SECS
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cronhub/cronhub.db", home)
}

impl CronhubConfig {
    /// Load config from a TOML file with CRONHUB_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `CRONHUB_RUNNER__POLL_INTERVAL_SECS=5`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        debug!(%path, "loading config");

        Self::from_figment(
            Figment::new()
                .merge(Toml::file(&path))
                .merge(Env::prefixed("CRONHUB_").split("__")),
        )
    }

    fn from_figment(figment: Figment) -> crate::error::Result<Self> {
        figment
            .extract()
            .map_err(|e| crate::error::CronhubError::Config(e.to_string()))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cronhub/cronhub.toml", home)
}
