use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::db::init_db;
use crate::error::{CampaignError, Result};
use crate::types::{
    Campaign, CampaignSchedule, CampaignStatus, Delivery, DeliveryStatus, ScheduleRequest,
    ScheduleStatus,
};

const CAMPAIGN_SELECT_SQL: &str = "SELECT id, subject, body, status, sent_count, failed_count,
        created_at, updated_at FROM campaigns";

const SCHEDULE_SELECT_SQL: &str = "SELECT id, campaign_id, status, start_at, end_at,
        interval_minutes, max_attempts, attempts, next_run_at, last_run_at,
        created_at, updated_at FROM campaign_schedules";

fn parse_status<T: std::str::FromStr<Err = String>>(
    idx: usize,
    raw: String,
) -> rusqlite::Result<T> {
    raw.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

/// Map a row from CAMPAIGN_SELECT_SQL to a Campaign.
fn row_to_campaign(row: &rusqlite::Row<'_>) -> rusqlite::Result<Campaign> {
    Ok(Campaign {
        id: row.get(0)?,
        subject: row.get(1)?,
        body: row.get(2)?,
        status: parse_status(3, row.get(3)?)?,
        sent_count: row.get(4)?,
        failed_count: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// Map a row from SCHEDULE_SELECT_SQL to a CampaignSchedule.
fn row_to_schedule(row: &rusqlite::Row<'_>) -> rusqlite::Result<CampaignSchedule> {
    Ok(CampaignSchedule {
        id: row.get(0)?,
        campaign_id: row.get(1)?,
        status: parse_status(2, row.get(2)?)?,
        start_at: row.get(3)?,
        end_at: row.get(4)?,
        interval_minutes: row.get(5)?,
        max_attempts: row.get(6)?,
        attempts: row.get(7)?,
        next_run_at: row.get(8)?,
        last_run_at: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn row_to_delivery(row: &rusqlite::Row<'_>) -> rusqlite::Result<Delivery> {
    Ok(Delivery {
        id: row.get(0)?,
        campaign_id: row.get(1)?,
        schedule_id: row.get(2)?,
        attempt: row.get(3)?,
        recipient: row.get(4)?,
        status: parse_status::<DeliveryStatus>(5, row.get(5)?)?,
        error: row.get(6)?,
        attempted_at: row.get(7)?,
    })
}

fn map_row_error(e: rusqlite::Error) -> CampaignError {
    match e {
        rusqlite::Error::FromSqlConversionFailure(_, _, inner) => {
            CampaignError::InvalidRecord(inner.to_string())
        }
        other => CampaignError::Database(other),
    }
}

/// How long a `running` claim is honoured before another processor may take
/// the schedule over.
pub const DEFAULT_CLAIM_LEASE_SECS: i64 = 3600;

/// Campaigns, their delivery schedules and the per-recipient delivery log.
pub struct CampaignStore {
    db: Mutex<Connection>,
    claim_lease_secs: i64,
}

impl CampaignStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            claim_lease_secs: DEFAULT_CLAIM_LEASE_SECS,
        })
    }

    pub fn with_claim_lease(mut self, secs: i64) -> Self {
        self.claim_lease_secs = secs;
        self
    }

    pub fn claim_lease_secs(&self) -> i64 {
        self.claim_lease_secs
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn db(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| CampaignError::LockPoisoned)
    }

    pub fn create_campaign(&self, subject: &str, body: &str, now: i64) -> Result<Campaign> {
        let db = self.db()?;
        db.execute(
            "INSERT INTO campaigns (subject, body, status, created_at, updated_at)
             VALUES (?1, ?2, 'draft', ?3, ?3)",
            params![subject, body, now],
        )?;
        let id = db.last_insert_rowid();
        info!(campaign_id = id, subject, "campaign created");
        Ok(Campaign {
            id,
            subject: subject.to_string(),
            body: body.to_string(),
            status: CampaignStatus::Draft,
            sent_count: 0,
            failed_count: 0,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_campaign(&self, id: i64) -> Result<Option<Campaign>> {
        self.db()?
            .query_row(
                &format!("{CAMPAIGN_SELECT_SQL} WHERE id = ?1"),
                [id],
                row_to_campaign,
            )
            .optional()
            .map_err(map_row_error)
    }

    pub fn save_campaign(&self, campaign: &Campaign) -> Result<()> {
        let n = self.db()?.execute(
            "UPDATE campaigns SET subject = ?1, body = ?2, status = ?3, sent_count = ?4,
             failed_count = ?5, updated_at = ?6 WHERE id = ?7",
            params![
                campaign.subject,
                campaign.body,
                campaign.status.to_string(),
                campaign.sent_count,
                campaign.failed_count,
                campaign.updated_at,
                campaign.id,
            ],
        )?;
        if n == 0 {
            return Err(CampaignError::CampaignNotFound { id: campaign.id });
        }
        Ok(())
    }

    /// Book delivery for a campaign. The first run happens once `start_at`
    /// has passed.
    pub fn schedule_campaign(&self, req: ScheduleRequest, now: i64) -> Result<CampaignSchedule> {
        if req.interval_minutes <= 0 {
            return Err(CampaignError::InvalidSchedule(format!(
                "interval_minutes must be positive, got {}",
                req.interval_minutes
            )));
        }
        if req.max_attempts == 0 {
            return Err(CampaignError::InvalidSchedule(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if let Some(end_at) = req.end_at {
            if end_at < req.start_at {
                return Err(CampaignError::InvalidSchedule(format!(
                    "end_at {end_at} is before start_at {}",
                    req.start_at
                )));
            }
        }

        let mut campaign = self
            .get_campaign(req.campaign_id)?
            .ok_or(CampaignError::CampaignNotFound { id: req.campaign_id })?;

        let db = self.db()?;
        let active: i64 = db.query_row(
            "SELECT COUNT(*) FROM campaign_schedules
             WHERE campaign_id = ?1 AND status != 'completed'",
            [req.campaign_id],
            |row| row.get(0),
        )?;
        if active > 0 {
            return Err(CampaignError::AlreadyScheduled {
                campaign_id: req.campaign_id,
            });
        }

        db.execute(
            "INSERT INTO campaign_schedules
             (campaign_id, status, start_at, end_at, interval_minutes, max_attempts,
              attempts, next_run_at, last_run_at, created_at, updated_at)
             VALUES (?1, 'scheduled', ?2, ?3, ?4, ?5, 0, NULL, NULL, ?6, ?6)",
            params![
                req.campaign_id,
                req.start_at,
                req.end_at,
                req.interval_minutes,
                req.max_attempts,
                now,
            ],
        )?;
        let id = db.last_insert_rowid();

        campaign.status = CampaignStatus::Scheduled;
        campaign.updated_at = now;
        db.execute(
            "UPDATE campaigns SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![campaign.status.to_string(), now, campaign.id],
        )?;

        info!(schedule_id = id, campaign_id = req.campaign_id, start_at = req.start_at, "campaign scheduled");
        Ok(CampaignSchedule {
            id,
            campaign_id: req.campaign_id,
            status: ScheduleStatus::Scheduled,
            start_at: req.start_at,
            end_at: req.end_at,
            interval_minutes: req.interval_minutes,
            max_attempts: req.max_attempts,
            attempts: 0,
            next_run_at: None,
            last_run_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_schedule(&self, id: i64) -> Result<Option<CampaignSchedule>> {
        self.db()?
            .query_row(
                &format!("{SCHEDULE_SELECT_SQL} WHERE id = ?1"),
                [id],
                row_to_schedule,
            )
            .optional()
            .map_err(map_row_error)
    }

    /// Schedules ready to run at `now`, oldest slot first. Includes
    /// `running` rows whose claim has outlived the lease.
    pub fn due_schedules(&self, now: i64) -> Result<Vec<CampaignSchedule>> {
        let expired_before = now.saturating_sub(self.claim_lease_secs);
        let db = self.db()?;
        let mut stmt = db.prepare_cached(&format!(
            "{SCHEDULE_SELECT_SQL}
             WHERE (status = 'scheduled' OR (status = 'running' AND updated_at <= ?2))
               AND start_at <= ?1
               AND (next_run_at IS NULL OR next_run_at <= ?1)
             ORDER BY COALESCE(next_run_at, start_at), id"
        ))?;
        let rows = stmt
            .query_map(params![now, expired_before], row_to_schedule)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(map_row_error)?;
        Ok(rows)
    }

    /// Move a schedule to `running` if nobody else holds a live claim on it.
    ///
    /// The attempt count is part of the condition, so a snapshot taken before
    /// another processor's run can never be claimed afterwards. A `running`
    /// row whose claim is older than the lease can be claimed again; the new
    /// claim refreshes `updated_at`, so only one caller takes it over.
    pub fn claim_schedule(&self, schedule: &CampaignSchedule, now: i64) -> Result<bool> {
        let expired_before = now.saturating_sub(self.claim_lease_secs);
        let n = self.db()?.execute(
            "UPDATE campaign_schedules SET status = 'running', updated_at = ?1
             WHERE id = ?2 AND attempts = ?3
               AND (status = 'scheduled' OR (status = 'running' AND updated_at <= ?4))",
            params![now, schedule.id, schedule.attempts, expired_before],
        )?;
        debug!(schedule_id = schedule.id, claimed = n == 1, "schedule claim attempted");
        Ok(n == 1)
    }

    /// Hand a claimed schedule back without counting a run. A campaign left
    /// `sending` by the aborted run goes back to `scheduled`.
    pub fn release_schedule(&self, schedule: &CampaignSchedule, now: i64) -> Result<()> {
        let db = self.db()?;
        db.execute(
            "UPDATE campaign_schedules SET status = 'scheduled', updated_at = ?1
             WHERE id = ?2 AND status = 'running'",
            params![now, schedule.id],
        )?;
        db.execute(
            "UPDATE campaigns SET status = 'scheduled', updated_at = ?1
             WHERE id = ?2 AND status = 'sending'",
            params![now, schedule.campaign_id],
        )?;
        debug!(schedule_id = schedule.id, "campaign schedule released");
        Ok(())
    }

    pub fn save_schedule(&self, schedule: &CampaignSchedule) -> Result<()> {
        let n = self.db()?.execute(
            "UPDATE campaign_schedules SET status = ?1, start_at = ?2, end_at = ?3,
             interval_minutes = ?4, max_attempts = ?5, attempts = ?6, next_run_at = ?7,
             last_run_at = ?8, updated_at = ?9 WHERE id = ?10",
            params![
                schedule.status.to_string(),
                schedule.start_at,
                schedule.end_at,
                schedule.interval_minutes,
                schedule.max_attempts,
                schedule.attempts,
                schedule.next_run_at,
                schedule.last_run_at,
                schedule.updated_at,
                schedule.id,
            ],
        )?;
        if n == 0 {
            return Err(CampaignError::ScheduleNotFound { id: schedule.id });
        }
        Ok(())
    }

    pub fn record_delivery(
        &self,
        schedule: &CampaignSchedule,
        attempt: u32,
        recipient: &str,
        status: DeliveryStatus,
        error: Option<&str>,
        now: i64,
    ) -> Result<()> {
        self.db()?.execute(
            "INSERT INTO campaign_deliveries
             (campaign_id, schedule_id, attempt, recipient, status, error, attempted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                schedule.campaign_id,
                schedule.id,
                attempt,
                recipient,
                status.to_string(),
                error,
                now,
            ],
        )?;
        Ok(())
    }

    /// Every delivery attempt for a campaign, in order.
    pub fn deliveries(&self, campaign_id: i64) -> Result<Vec<Delivery>> {
        let db = self.db()?;
        let mut stmt = db.prepare_cached(
            "SELECT id, campaign_id, schedule_id, attempt, recipient, status, error, attempted_at
             FROM campaign_deliveries WHERE campaign_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([campaign_id], row_to_delivery)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(map_row_error)?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(campaign_id: i64) -> ScheduleRequest {
        ScheduleRequest {
            campaign_id,
            start_at: 1_000,
            end_at: Some(10_000),
            interval_minutes: 30,
            max_attempts: 3,
        }
    }

    #[test]
    fn scheduling_marks_campaign_scheduled() {
        let store = CampaignStore::open_in_memory().unwrap();
        let campaign = store.create_campaign("Hello", "Body", 10).unwrap();
        assert_eq!(campaign.status, CampaignStatus::Draft);

        let schedule = store.schedule_campaign(request(campaign.id), 20).unwrap();
        assert_eq!(schedule.status, ScheduleStatus::Scheduled);
        assert_eq!(schedule.next_run_at, None);
        assert_eq!(store.get_schedule(schedule.id).unwrap().unwrap(), schedule);

        let stored = store.get_campaign(campaign.id).unwrap().unwrap();
        assert_eq!(stored.status, CampaignStatus::Scheduled);
        assert_eq!(stored.updated_at, 20);
    }

    #[test]
    fn invalid_requests_are_rejected() {
        let store = CampaignStore::open_in_memory().unwrap();
        let campaign = store.create_campaign("s", "b", 0).unwrap();

        let mut bad = request(campaign.id);
        bad.interval_minutes = 0;
        assert!(matches!(
            store.schedule_campaign(bad, 0),
            Err(CampaignError::InvalidSchedule(_))
        ));

        let mut bad = request(campaign.id);
        bad.max_attempts = 0;
        assert!(store.schedule_campaign(bad, 0).is_err());

        let mut bad = request(campaign.id);
        bad.end_at = Some(500);
        assert!(store.schedule_campaign(bad, 0).is_err());

        assert!(matches!(
            store.schedule_campaign(request(999), 0),
            Err(CampaignError::CampaignNotFound { id: 999 })
        ));
    }

    #[test]
    fn one_active_schedule_per_campaign() {
        let store = CampaignStore::open_in_memory().unwrap();
        let campaign = store.create_campaign("s", "b", 0).unwrap();
        let mut schedule = store.schedule_campaign(request(campaign.id), 0).unwrap();

        assert!(matches!(
            store.schedule_campaign(request(campaign.id), 0),
            Err(CampaignError::AlreadyScheduled { .. })
        ));

        schedule.status = ScheduleStatus::Completed;
        store.save_schedule(&schedule).unwrap();
        assert!(store.schedule_campaign(request(campaign.id), 0).is_ok());
    }

    #[test]
    fn due_schedules_respect_start_and_next_run() {
        let store = CampaignStore::open_in_memory().unwrap();
        let a = store.create_campaign("a", "b", 0).unwrap();
        let b = store.create_campaign("b", "b", 0).unwrap();
        let sa = store.schedule_campaign(request(a.id), 0).unwrap();
        let mut sb = store.schedule_campaign(request(b.id), 0).unwrap();

        assert!(store.due_schedules(999).unwrap().is_empty());
        assert_eq!(store.due_schedules(1_000).unwrap().len(), 2);

        sb.next_run_at = Some(2_000);
        store.save_schedule(&sb).unwrap();
        let due: Vec<i64> = store.due_schedules(1_500).unwrap().iter().map(|s| s.id).collect();
        assert_eq!(due, vec![sa.id]);
    }

    #[test]
    fn claim_is_exclusive_and_releasable() {
        let store = CampaignStore::open_in_memory().unwrap();
        let campaign = store.create_campaign("s", "b", 0).unwrap();
        let schedule = store.schedule_campaign(request(campaign.id), 0).unwrap();

        assert!(store.claim_schedule(&schedule, 1_000).unwrap());
        assert!(!store.claim_schedule(&schedule, 1_000).unwrap());
        assert!(store.due_schedules(1_000).unwrap().is_empty());

        store.release_schedule(&schedule, 1_001).unwrap();
        assert_eq!(store.due_schedules(1_001).unwrap().len(), 1);
    }

    #[test]
    fn release_returns_sending_campaign_to_scheduled() {
        let store = CampaignStore::open_in_memory().unwrap();
        let mut campaign = store.create_campaign("s", "b", 0).unwrap();
        let schedule = store.schedule_campaign(request(campaign.id), 0).unwrap();
        assert!(store.claim_schedule(&schedule, 1_000).unwrap());
        campaign.status = CampaignStatus::Sending;
        store.save_campaign(&campaign).unwrap();

        store.release_schedule(&schedule, 1_001).unwrap();
        let stored = store.get_campaign(campaign.id).unwrap().unwrap();
        assert_eq!(stored.status, CampaignStatus::Scheduled);
        assert_eq!(stored.updated_at, 1_001);
    }

    #[test]
    fn abandoned_claim_expires_after_the_lease() {
        let store = CampaignStore::open_in_memory()
            .unwrap()
            .with_claim_lease(600);
        let campaign = store.create_campaign("s", "b", 0).unwrap();
        let schedule = store.schedule_campaign(request(campaign.id), 0).unwrap();

        // Claimed and never finished or released.
        assert!(store.claim_schedule(&schedule, 1_000).unwrap());
        assert!(store.due_schedules(1_599).unwrap().is_empty());

        let stale = store.due_schedules(1_600).unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].status, ScheduleStatus::Running);

        assert!(store.claim_schedule(&stale[0], 1_600).unwrap());
        // The takeover refreshed the claim.
        assert!(!store.claim_schedule(&stale[0], 1_600).unwrap());
        assert!(store.due_schedules(1_600).unwrap().is_empty());
    }

    #[test]
    fn deliveries_are_appended_in_order() {
        let store = CampaignStore::open_in_memory().unwrap();
        let campaign = store.create_campaign("s", "b", 0).unwrap();
        let schedule = store.schedule_campaign(request(campaign.id), 0).unwrap();

        store
            .record_delivery(&schedule, 1, "a@example.com", DeliveryStatus::Sent, None, 5)
            .unwrap();
        store
            .record_delivery(&schedule, 1, "b@example.com", DeliveryStatus::Failed, Some("bounced"), 6)
            .unwrap();

        let log = store.deliveries(campaign.id).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].recipient, "a@example.com");
        assert_eq!(log[1].status, DeliveryStatus::Failed);
        assert_eq!(log[1].error.as_deref(), Some("bounced"));
    }
}
