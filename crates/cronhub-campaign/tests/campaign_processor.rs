// Campaign batch runs: paging, attempt budget, send window and failure
// accounting against an in-memory store.

use std::sync::{Arc, Mutex};

use cronhub_campaign::{
    CampaignError, CampaignProcessor, CampaignStatus, CampaignStore, DeliveryStatus, MailError,
    MailSender, OutgoingMail, Recipient, RecipientSource, ScheduleRequest, ScheduleStatus,
    DEFAULT_CLAIM_LEASE_SECS,
};

const START: i64 = 1_000;

struct FixedRecipients(Vec<Recipient>);

impl FixedRecipients {
    fn new(emails: &[&str]) -> Self {
        Self(
            emails
                .iter()
                .enumerate()
                .map(|(i, email)| Recipient {
                    id: i as i64 + 1,
                    email: email.to_string(),
                    name: None,
                })
                .collect(),
        )
    }
}

impl RecipientSource for FixedRecipients {
    fn total(&self) -> cronhub_campaign::Result<u64> {
        Ok(self.0.len() as u64)
    }

    fn page(&self, offset: u64, limit: u32) -> cronhub_campaign::Result<Vec<Recipient>> {
        Ok(self
            .0
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

struct BrokenRecipients;

impl RecipientSource for BrokenRecipients {
    fn total(&self) -> cronhub_campaign::Result<u64> {
        Err(CampaignError::InvalidRecord("subscriber table unreadable".to_string()))
    }

    fn page(&self, _offset: u64, _limit: u32) -> cronhub_campaign::Result<Vec<Recipient>> {
        Ok(Vec::new())
    }
}

/// Records every send and rejects addresses starting with "bounce".
#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<String>>,
}

impl MailSender for RecordingSender {
    fn send(&self, to: &Recipient, _mail: &OutgoingMail) -> Result<(), MailError> {
        if to.email.starts_with("bounce") {
            return Err(MailError::Rejected("mailbox unavailable".to_string()));
        }
        self.sent.lock().unwrap().push(to.email.clone());
        Ok(())
    }
}

struct Setup {
    store: Arc<CampaignStore>,
    sender: Arc<RecordingSender>,
    processor: CampaignProcessor,
    campaign_id: i64,
    schedule_id: i64,
}

fn setup(
    recipients: Arc<dyn RecipientSource>,
    batch_size: u32,
    max_attempts: u32,
    end_at: Option<i64>,
) -> Setup {
    setup_with_interval(recipients, batch_size, max_attempts, end_at, 10)
}

fn setup_with_interval(
    recipients: Arc<dyn RecipientSource>,
    batch_size: u32,
    max_attempts: u32,
    end_at: Option<i64>,
    interval_minutes: i64,
) -> Setup {
    let store = Arc::new(CampaignStore::open_in_memory().unwrap());
    let sender = Arc::new(RecordingSender::default());
    let processor =
        CampaignProcessor::new(store.clone(), recipients, sender.clone(), batch_size).unwrap();

    let campaign = store.create_campaign("Spring news", "Hello!", 0).unwrap();
    let schedule = store
        .schedule_campaign(
            ScheduleRequest {
                campaign_id: campaign.id,
                start_at: START,
                end_at,
                interval_minutes,
                max_attempts,
            },
            0,
        )
        .unwrap();

    Setup {
        store,
        sender,
        processor,
        campaign_id: campaign.id,
        schedule_id: schedule.id,
    }
}

fn five() -> Arc<dyn RecipientSource> {
    Arc::new(FixedRecipients::new(&[
        "a@example.com",
        "b@example.com",
        "c@example.com",
        "d@example.com",
        "e@example.com",
    ]))
}

#[test]
fn delivers_in_pages_until_complete() {
    let s = setup(five(), 2, 5, None);

    assert!(s.processor.process_due(START - 1).unwrap().is_empty());

    let first = s.processor.process_due(START).unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].sent, 2);
    assert_eq!(first[0].schedule_status, ScheduleStatus::Scheduled);
    assert_eq!(first[0].next_run_at, Some(START + 600));

    // Not due again until the interval has passed.
    assert!(s.processor.process_due(START + 599).unwrap().is_empty());

    let second = s.processor.process_due(START + 600).unwrap();
    assert_eq!(second[0].attempt, 2);
    assert_eq!(second[0].sent, 2);

    let third = s.processor.process_due(START + 1200).unwrap();
    assert_eq!(third[0].sent, 1);
    assert_eq!(third[0].schedule_status, ScheduleStatus::Completed);
    assert_eq!(third[0].campaign_status, CampaignStatus::Completed);
    assert_eq!(third[0].next_run_at, None);

    assert_eq!(
        *s.sender.sent.lock().unwrap(),
        vec![
            "a@example.com",
            "b@example.com",
            "c@example.com",
            "d@example.com",
            "e@example.com"
        ]
    );

    let schedule = s.store.get_schedule(s.schedule_id).unwrap().unwrap();
    assert_eq!(schedule.attempts, 3);
    assert_eq!(schedule.last_run_at, Some(START + 1200));
    let campaign = s.store.get_campaign(s.campaign_id).unwrap().unwrap();
    assert_eq!(campaign.sent_count, 5);
    assert_eq!(campaign.failed_count, 0);

    // Completed schedules never come back.
    assert!(s.processor.process_due(START + 100_000).unwrap().is_empty());
}

#[test]
fn exhausted_attempts_fail_the_campaign() {
    let s = setup(five(), 2, 2, None);

    s.processor.process_due(START).unwrap();
    let last = s.processor.process_due(START + 600).unwrap();

    assert_eq!(last[0].schedule_status, ScheduleStatus::Completed);
    assert_eq!(last[0].campaign_status, CampaignStatus::Failed);

    let schedule = s.store.get_schedule(s.schedule_id).unwrap().unwrap();
    assert_eq!(schedule.attempts, schedule.max_attempts);
    assert_eq!(schedule.next_run_at, None);
    assert_eq!(s.sender.sent.lock().unwrap().len(), 4);
}

#[test]
fn closing_send_window_fails_the_campaign() {
    // The next slot (START + 600) would land after the window closes.
    let s = setup(five(), 2, 10, Some(START + 300));

    let report = s.processor.process_due(START).unwrap();
    assert_eq!(report[0].schedule_status, ScheduleStatus::Completed);
    assert_eq!(report[0].campaign_status, CampaignStatus::Failed);
    assert_eq!(
        s.store.get_campaign(s.campaign_id).unwrap().unwrap().status,
        CampaignStatus::Failed
    );
}

#[test]
fn send_failures_are_counted_not_fatal() {
    let recipients = Arc::new(FixedRecipients::new(&[
        "bounce1@example.com",
        "ok@example.com",
        "bounce2@example.com",
    ]));
    let s = setup(recipients, 10, 1, None);

    let report = s.processor.process_due(START).unwrap();
    assert_eq!(report[0].sent, 1);
    assert_eq!(report[0].failed, 2);
    assert_eq!(report[0].campaign_status, CampaignStatus::Completed);

    let deliveries = s.store.deliveries(s.campaign_id).unwrap();
    assert_eq!(deliveries.len(), 3);
    assert_eq!(deliveries[0].status, DeliveryStatus::Failed);
    assert_eq!(deliveries[0].error.as_deref(), Some("rejected: mailbox unavailable"));
    assert_eq!(deliveries[1].status, DeliveryStatus::Sent);
    assert!(deliveries.iter().all(|d| d.attempt == 1));
}

#[test]
fn nothing_sent_and_something_failed_is_failure() {
    let recipients = Arc::new(FixedRecipients::new(&["bounce@example.com"]));
    let s = setup(recipients, 10, 3, None);

    let report = s.processor.process_due(START).unwrap();
    assert_eq!(report[0].schedule_status, ScheduleStatus::Completed);
    assert_eq!(report[0].campaign_status, CampaignStatus::Failed);
}

#[test]
fn no_recipients_completes_immediately() {
    let s = setup(Arc::new(FixedRecipients::new(&[])), 10, 3, None);

    let report = s.processor.process_due(START).unwrap();
    assert_eq!(report[0].sent, 0);
    assert_eq!(report[0].failed, 0);
    assert_eq!(report[0].campaign_status, CampaignStatus::Completed);
}

#[test]
fn stale_snapshot_cannot_run_twice() {
    let s = setup(five(), 2, 5, None);
    let snapshot = s.store.due_schedules(START).unwrap().remove(0);

    assert!(s.processor.process_schedule(snapshot.clone(), START).unwrap().is_some());
    // Same snapshot, later time: the stored attempt count has moved on.
    assert!(s.processor.process_schedule(snapshot, START + 600).unwrap().is_none());
    assert_eq!(s.sender.sent.lock().unwrap().len(), 2);
}

#[test]
fn storage_error_releases_the_claim() {
    let s = setup(Arc::new(BrokenRecipients), 2, 3, None);

    let err = s.processor.process_due(START).unwrap_err();
    assert!(matches!(err, CampaignError::InvalidRecord(_)));

    let schedule = s.store.get_schedule(s.schedule_id).unwrap().unwrap();
    assert_eq!(schedule.status, ScheduleStatus::Scheduled);
    assert_eq!(schedule.attempts, 0);
    // The aborted run must not leave the campaign looking like it is sending.
    assert_eq!(
        s.store.get_campaign(s.campaign_id).unwrap().unwrap().status,
        CampaignStatus::Scheduled
    );
}

#[test]
fn huge_interval_saturates_instead_of_overflowing() {
    let s = setup_with_interval(five(), 2, 5, None, i64::MAX / 2);

    let report = s.processor.process_due(START).unwrap();
    assert_eq!(report[0].sent, 2);
    assert_eq!(report[0].schedule_status, ScheduleStatus::Scheduled);
    assert_eq!(report[0].next_run_at, Some(i64::MAX));

    let schedule = s.store.get_schedule(s.schedule_id).unwrap().unwrap();
    assert_eq!(schedule.status, ScheduleStatus::Scheduled);
    assert!(s.processor.process_due(START + 600).unwrap().is_empty());
}

#[test]
fn abandoned_claim_is_taken_over_after_the_lease() {
    let s = setup(five(), 2, 5, None);

    // A processor claims the schedule and dies before finishing the batch.
    let snapshot = s.store.due_schedules(START).unwrap().remove(0);
    assert!(s.store.claim_schedule(&snapshot, START).unwrap());

    assert!(s.processor.process_due(START + 60).unwrap().is_empty());
    assert!(s
        .processor
        .process_due(START + DEFAULT_CLAIM_LEASE_SECS - 1)
        .unwrap()
        .is_empty());

    let takeover = START + DEFAULT_CLAIM_LEASE_SECS;
    let report = s.processor.process_due(takeover).unwrap();
    assert_eq!(report.len(), 1);
    assert_eq!(report[0].attempt, 1);
    assert_eq!(report[0].sent, 2);
    assert_eq!(report[0].next_run_at, Some(takeover + 600));

    let schedule = s.store.get_schedule(s.schedule_id).unwrap().unwrap();
    assert_eq!(schedule.status, ScheduleStatus::Scheduled);
    assert_eq!(schedule.attempts, 1);
}

#[test]
fn zero_batch_size_is_rejected() {
    let store = Arc::new(CampaignStore::open_in_memory().unwrap());
    let result = CampaignProcessor::new(
        store,
        five(),
        Arc::new(RecordingSender::default()),
        0,
    );
    assert!(matches!(result, Err(CampaignError::InvalidSchedule(_))));
}
