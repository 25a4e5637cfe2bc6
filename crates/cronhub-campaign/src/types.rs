use serde::{Deserialize, Serialize};

/// Lifecycle of a campaign's delivery schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    /// Waiting for `start_at` / `next_run_at`.
    Scheduled,
    /// Claimed by a processor; a batch is being sent.
    Running,
    /// Terminal. Never reactivated.
    Completed,
}

impl std::fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScheduleStatus::Scheduled => "scheduled",
            ScheduleStatus::Running => "running",
            ScheduleStatus::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ScheduleStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(ScheduleStatus::Scheduled),
            "running" => Ok(ScheduleStatus::Running),
            "completed" => Ok(ScheduleStatus::Completed),
            other => Err(format!("unknown schedule status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Completed,
    /// Nothing was delivered, or delivery stopped before every recipient
    /// was reached.
    Failed,
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Sending => "sending",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "scheduled" => Ok(CampaignStatus::Scheduled),
            "sending" => Ok(CampaignStatus::Sending),
            "completed" => Ok(CampaignStatus::Completed),
            "failed" => Ok(CampaignStatus::Failed),
            other => Err(format!("unknown campaign status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: i64,
    pub subject: String,
    pub body: String,
    pub status: CampaignStatus,
    /// Successful sends, summed over every run.
    pub sent_count: i64,
    /// Failed sends, summed over every run.
    pub failed_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignSchedule {
    pub id: i64,
    pub campaign_id: i64,
    pub status: ScheduleStatus,
    /// No run happens before this instant.
    pub start_at: i64,
    /// A run that would be booked after this instant is not booked.
    pub end_at: Option<i64>,
    pub interval_minutes: i64,
    pub max_attempts: u32,
    /// Runs so far; never exceeds `max_attempts`.
    pub attempts: u32,
    /// `None` means run as soon as `start_at` has passed.
    pub next_run_at: Option<i64>,
    pub last_run_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl CampaignSchedule {
    /// Whether a processor may pick this schedule up at `now`.
    pub fn is_due(&self, now: i64) -> bool {
        self.status == ScheduleStatus::Scheduled
            && self.start_at <= now
            && self.next_run_at.map_or(true, |next| next <= now)
    }

    /// Like [`Self::is_due`], but a `running` schedule whose claim is at
    /// least `lease_secs` old also qualifies.
    pub fn is_claimable(&self, now: i64, lease_secs: i64) -> bool {
        let expired_claim = self.status == ScheduleStatus::Running
            && self.updated_at <= now.saturating_sub(lease_secs);
        (self.status == ScheduleStatus::Scheduled || expired_claim)
            && self.start_at <= now
            && self.next_run_at.map_or(true, |next| next <= now)
    }
}

/// Parameters for booking a campaign's delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub campaign_id: i64,
    pub start_at: i64,
    pub end_at: Option<i64>,
    pub interval_minutes: i64,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: i64,
    pub email: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMail {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Sent => write!(f, "sent"),
            DeliveryStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "sent" => Ok(DeliveryStatus::Sent),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(format!("unknown delivery status: {other}")),
        }
    }
}

/// One per-recipient send attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub id: i64,
    pub campaign_id: i64,
    pub schedule_id: i64,
    /// 1-based run number that produced this attempt.
    pub attempt: u32,
    pub recipient: String,
    pub status: DeliveryStatus,
    pub error: Option<String>,
    pub attempted_at: i64,
}

/// Summary of one processed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub schedule_id: i64,
    pub campaign_id: i64,
    pub attempt: u32,
    /// Sends in this run only.
    pub sent: u64,
    pub failed: u64,
    pub schedule_status: ScheduleStatus,
    pub campaign_status: CampaignStatus,
    pub next_run_at: Option<i64>,
}
