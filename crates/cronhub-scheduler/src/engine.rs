use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::manager::Manager;

/// Long-running trigger: calls [`Manager::run_due_tasks`] on a fixed poll
/// interval until shutdown.
///
/// Safe to run next to other triggers (HTTP pings, OS cron, more engines on
/// the same database): claims keep every occurrence single-shot.
pub struct CronEngine {
    manager: Arc<Manager>,
    poll_interval: Duration,
}

impl CronEngine {
    pub fn new(manager: Arc<Manager>, poll_interval: Duration) -> Self {
        Self {
            manager,
            poll_interval,
        }
    }

    /// Main event loop. Polls until `shutdown` broadcasts `true`.
    ///
    /// A failed pass (storage unavailable, …) is logged and retried on the
    /// next tick; the loop itself never exits on error.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(poll_secs = self.poll_interval.as_secs_f64(), "cron engine started");

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => self.tick().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("cron engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&self) {
        // Hooks are synchronous and may block (mail, HTTP); keep them off the
        // async workers.
        let manager = Arc::clone(&self.manager);
        match tokio::task::spawn_blocking(move || manager.run_due_tasks()).await {
            Ok(Ok(0)) => debug!("no due tasks"),
            Ok(Ok(n)) => info!(processed = n, "cron pass complete"),
            Ok(Err(e)) => error!("cron pass failed: {e}"),
            Err(e) => error!("cron pass aborted: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{SqliteTaskRepository, TaskRepository};
    use cronhub_core::clock::ManualClock;
    use cronhub_hooks::HookRegistry;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn engine_runs_due_task_once_and_stops() {
        let clock = Arc::new(ManualClock::new(1_000));
        let hooks = Arc::new(HookRegistry::new());
        let repo = Arc::new(SqliteTaskRepository::open_in_memory().unwrap());

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        hooks.register("ping", move |_: &[Value]| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        });

        let manager = Arc::new(Manager::new(repo.clone(), hooks, clock));
        manager.schedule_single_event("ping", 1_000, vec![]).unwrap();

        let (tx, rx) = watch::channel(false);
        let engine = CronEngine::new(manager, Duration::from_millis(10));
        let handle = tokio::spawn(engine.run(rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(repo.list_tasks().unwrap().is_empty());
        assert_eq!(repo.last_run("ping").unwrap(), Some(1_000));
    }
}
