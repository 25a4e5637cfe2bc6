use std::sync::Arc;

use cronhub_campaign::CampaignProcessor;
use cronhub_core::Clock;
use cronhub_hooks::{HookError, HookRegistry};
use cronhub_scheduler::Manager;
use serde_json::{json, Value};
use tracing::info;

pub const HEARTBEAT_HOOK: &str = "cron.heartbeat";
pub const CAMPAIGN_HOOK: &str = "campaign.process";

pub const HEARTBEAT_INTERVAL_SECS: i64 = 3600;
pub const CAMPAIGN_INTERVAL_SECS: i64 = 60;

pub fn register_builtin_hooks(
    hooks: &HookRegistry,
    processor: Arc<CampaignProcessor>,
    clock: Arc<dyn Clock>,
) {
    let heartbeat_clock = Arc::clone(&clock);
    hooks.register(HEARTBEAT_HOOK, move |_: &[Value]| {
        let now = heartbeat_clock.now();
        info!(now, "cron heartbeat");
        Ok(json!({ "ts": now }))
    });

    hooks.register(CAMPAIGN_HOOK, move |_: &[Value]| {
        let reports = processor
            .process_due(clock.now())
            .map_err(|e| HookError::failed(e.to_string()))?;
        Ok(json!({ "runs": reports }))
    });
}

/// Book the built-in recurring tasks unless they are already pending.
pub fn ensure_builtin_tasks(manager: &Manager) -> cronhub_scheduler::Result<()> {
    for (hook, interval) in [
        (HEARTBEAT_HOOK, HEARTBEAT_INTERVAL_SECS),
        (CAMPAIGN_HOOK, CAMPAIGN_INTERVAL_SECS),
    ] {
        if manager.next_scheduled(hook)?.is_none() {
            let task = manager.schedule_event(hook, interval, Vec::new())?;
            info!(task_id = task.id, hook, interval, "built-in task scheduled");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{App, Connections};
    use cronhub_campaign::{CampaignStatus, ScheduleRequest};
    use cronhub_core::{CronhubConfig, ManualClock};
    use cronhub_scheduler::RunStatus;
    use rusqlite::Connection;

    const T0: i64 = 1_700_000_000;

    fn app(clock: Arc<ManualClock>) -> App {
        let connections = Connections {
            tasks: Connection::open_in_memory().unwrap(),
            campaigns: Connection::open_in_memory().unwrap(),
            subscribers: Connection::open_in_memory().unwrap(),
        };
        App::build(CronhubConfig::default(), clock, connections).unwrap()
    }

    #[test]
    fn builtin_hooks_are_registered() {
        let app = app(Arc::new(ManualClock::new(T0)));
        assert!(app.hooks.has_hook(HEARTBEAT_HOOK));
        assert!(app.hooks.has_hook(CAMPAIGN_HOOK));
    }

    #[test]
    fn ensure_builtin_tasks_is_idempotent() {
        let app = app(Arc::new(ManualClock::new(T0)));
        ensure_builtin_tasks(&app.manager).unwrap();
        ensure_builtin_tasks(&app.manager).unwrap();

        let tasks = app.manager.repository().list_tasks().unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(
            app.manager.next_scheduled(HEARTBEAT_HOOK).unwrap(),
            Some(T0 + HEARTBEAT_INTERVAL_SECS)
        );
    }

    #[test]
    fn cron_pass_drives_campaign_delivery() {
        let clock = Arc::new(ManualClock::new(T0));
        let app = app(clock.clone());
        for email in ["a@example.com", "b@example.com", "c@example.com"] {
            app.subscribers.upsert_subscriber(email, None, true, T0).unwrap();
        }
        let campaign = app.campaigns.create_campaign("News", "Body", T0).unwrap();
        app.campaigns
            .schedule_campaign(
                ScheduleRequest {
                    campaign_id: campaign.id,
                    start_at: T0,
                    end_at: None,
                    interval_minutes: 5,
                    max_attempts: 3,
                },
                T0,
            )
            .unwrap();

        ensure_builtin_tasks(&app.manager).unwrap();
        clock.advance(CAMPAIGN_INTERVAL_SECS);
        assert_eq!(app.manager.run_due_tasks().unwrap(), 1);

        let log = app.manager.repository().recent_logs(Some(CAMPAIGN_HOOK), 1).unwrap();
        assert_eq!(log[0].status, RunStatus::Success);

        let stored = app.campaigns.get_campaign(campaign.id).unwrap().unwrap();
        assert_eq!(stored.status, CampaignStatus::Completed);
        assert_eq!(stored.sent_count, 3);
    }
}
