use std::sync::Arc;

use tracing::{error, info, warn};

use crate::collaborators::{MailSender, RecipientSource};
use crate::error::{CampaignError, Result};
use crate::store::CampaignStore;
use crate::types::{
    CampaignSchedule, CampaignStatus, DeliveryStatus, OutgoingMail, RunReport, ScheduleStatus,
};

/// Sends due campaigns one recipient page per run.
pub struct CampaignProcessor {
    store: Arc<CampaignStore>,
    recipients: Arc<dyn RecipientSource>,
    mailer: Arc<dyn MailSender>,
    batch_size: u32,
}

impl CampaignProcessor {
    pub fn new(
        store: Arc<CampaignStore>,
        recipients: Arc<dyn RecipientSource>,
        mailer: Arc<dyn MailSender>,
        batch_size: u32,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(CampaignError::InvalidSchedule(
                "batch size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            store,
            recipients,
            mailer,
            batch_size,
        })
    }

    /// Run every schedule that is due at `now`. Schedules claimed by another
    /// processor in the meantime are skipped.
    pub fn process_due(&self, now: i64) -> Result<Vec<RunReport>> {
        let mut reports = Vec::new();
        for schedule in self.store.due_schedules(now)? {
            if let Some(report) = self.process_schedule(schedule, now)? {
                reports.push(report);
            }
        }
        Ok(reports)
    }

    /// Claim and run one schedule. Returns `None` if it was not due or the
    /// claim was lost.
    ///
    /// A schedule left `running` by a processor that died mid-batch is picked
    /// up again once its claim is older than the store's lease.
    pub fn process_schedule(
        &self,
        schedule: CampaignSchedule,
        now: i64,
    ) -> Result<Option<RunReport>> {
        if !schedule.is_claimable(now, self.store.claim_lease_secs()) {
            return Ok(None);
        }
        if !self.store.claim_schedule(&schedule, now)? {
            info!(schedule_id = schedule.id, "campaign schedule claimed elsewhere, skipping");
            return Ok(None);
        }
        if schedule.status == ScheduleStatus::Running {
            warn!(
                schedule_id = schedule.id,
                claimed_at = schedule.updated_at,
                "previous campaign claim expired, running again"
            );
        }

        match self.run_claimed(schedule.clone(), now) {
            Ok(report) => Ok(Some(report)),
            Err(e) => {
                error!(schedule_id = schedule.id, "campaign run failed: {e}");
                if let Err(release_err) = self.store.release_schedule(&schedule, now) {
                    error!(
                        schedule_id = schedule.id,
                        "could not release campaign schedule: {release_err}"
                    );
                }
                Err(e)
            }
        }
    }

    fn run_claimed(&self, mut schedule: CampaignSchedule, now: i64) -> Result<RunReport> {
        let mut campaign = self
            .store
            .get_campaign(schedule.campaign_id)?
            .ok_or(CampaignError::CampaignNotFound {
                id: schedule.campaign_id,
            })?;
        campaign.status = CampaignStatus::Sending;
        campaign.updated_at = now;
        self.store.save_campaign(&campaign)?;

        let total = self.recipients.total()?;
        let offset = u64::from(schedule.attempts) * u64::from(self.batch_size);
        let batch = if offset < total {
            self.recipients.page(offset, self.batch_size)?
        } else {
            Vec::new()
        };
        let attempt = schedule.attempts + 1;
        let mail = OutgoingMail {
            subject: campaign.subject.clone(),
            body: campaign.body.clone(),
        };

        info!(
            schedule_id = schedule.id,
            campaign_id = campaign.id,
            attempt,
            offset,
            batch = batch.len(),
            total,
            "campaign run started"
        );

        let (mut sent, mut failed) = (0u64, 0u64);
        for recipient in &batch {
            match self.mailer.send(recipient, &mail) {
                Ok(()) => {
                    sent += 1;
                    self.store.record_delivery(
                        &schedule,
                        attempt,
                        &recipient.email,
                        DeliveryStatus::Sent,
                        None,
                        now,
                    )?;
                }
                Err(e) => {
                    failed += 1;
                    warn!(campaign_id = campaign.id, recipient = %recipient.email, "send failed: {e}");
                    self.store.record_delivery(
                        &schedule,
                        attempt,
                        &recipient.email,
                        DeliveryStatus::Failed,
                        Some(&e.to_string()),
                        now,
                    )?;
                }
            }
        }

        campaign.sent_count += sent as i64;
        campaign.failed_count += failed as i64;
        schedule.attempts = attempt;
        schedule.last_run_at = Some(now);
        schedule.updated_at = now;

        let all_processed = offset + batch.len() as u64 >= total;
        let next_run_at = now.saturating_add(schedule.interval_minutes.saturating_mul(60));
        if all_processed {
            schedule.status = ScheduleStatus::Completed;
            schedule.next_run_at = None;
            campaign.status = if campaign.sent_count == 0 && campaign.failed_count > 0 {
                CampaignStatus::Failed
            } else {
                CampaignStatus::Completed
            };
        } else if schedule.attempts >= schedule.max_attempts
            || schedule.end_at.is_some_and(|end| next_run_at > end)
        {
            warn!(
                schedule_id = schedule.id,
                campaign_id = campaign.id,
                attempts = schedule.attempts,
                remaining = total.saturating_sub(offset + batch.len() as u64),
                "campaign stopped before reaching every recipient"
            );
            schedule.status = ScheduleStatus::Completed;
            schedule.next_run_at = None;
            campaign.status = CampaignStatus::Failed;
        } else {
            schedule.status = ScheduleStatus::Scheduled;
            schedule.next_run_at = Some(next_run_at);
            campaign.status = CampaignStatus::Scheduled;
        }
        campaign.updated_at = now;

        self.store.save_schedule(&schedule)?;
        self.store.save_campaign(&campaign)?;

        info!(
            schedule_id = schedule.id,
            campaign_id = campaign.id,
            sent,
            failed,
            schedule_status = %schedule.status,
            campaign_status = %campaign.status,
            "campaign run finished"
        );

        Ok(RunReport {
            schedule_id: schedule.id,
            campaign_id: campaign.id,
            attempt,
            sent,
            failed,
            schedule_status: schedule.status,
            campaign_status: campaign.status,
            next_run_at: schedule.next_run_at,
        })
    }
}
