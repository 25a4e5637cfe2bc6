use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use cronhub_core::clock::Clock;
use cronhub_core::config::DEFAULT_SLOW_HOOK_WARN_SECS;
use cronhub_hooks::HookRegistry;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::{
    error::Result,
    repository::TaskRepository,
    schedule::{next_occurrence, validate_hook_name, validate_interval},
    types::{LogEntry, NewLogEntry, NewTask, RunStatus, Task},
};

/// Runs due cron tasks and manages the task table.
///
/// The hook registry, store and clock are all injected at construction.
pub struct Manager {
    repo: Arc<dyn TaskRepository>,
    hooks: Arc<HookRegistry>,
    clock: Arc<dyn Clock>,
    slow_hook_warn_secs: i64,
}

impl Manager {
    pub fn new(
        repo: Arc<dyn TaskRepository>,
        hooks: Arc<HookRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            hooks,
            clock,
            slow_hook_warn_secs: DEFAULT_SLOW_HOOK_WARN_SECS,
        }
    }

    /// Hooks running at least this long are reported with `warn!`.
    pub fn with_slow_hook_warning(mut self, secs: i64) -> Self {
        self.slow_hook_warn_secs = secs;
        self
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    pub fn repository(&self) -> &Arc<dyn TaskRepository> {
        &self.repo
    }

    /// Process every task that is due right now.
    ///
    /// Each task is claimed first: recurring tasks are moved to their next
    /// slot and one-shot tasks are deleted, both conditionally on the
    /// `scheduled_at` we read. Only the caller that wins the claim invokes
    /// the hook, so overlapping triggers never run one occurrence twice.
    ///
    /// Returns the number of tasks attempted and logged. Hook failures are
    /// logged and do not stop the pass; repository errors abort it.
    pub fn run_due_tasks(&self) -> Result<usize> {
        let now = self.clock.now();
        let due = self.repo.due_tasks(now)?;
        if due.is_empty() {
            return Ok(0);
        }
        info!(count = due.len(), now, "due tasks found");

        let mut processed = 0;
        for task in due {
            let next = task
                .interval_seconds
                .map(|interval| next_occurrence(task.scheduled_at, interval));

            if !self.repo.claim_task(&task, next)? {
                info!(task_id = task.id, hook = %task.hook, "task already claimed elsewhere, skipping");
                continue;
            }

            let entry = self.execute(Some(task.id), &task.hook, &task.args)?;
            match next {
                Some(next) => info!(
                    task_id = task.id,
                    hook = %task.hook,
                    status = %entry.status,
                    next_scheduled_at = next,
                    "recurring task rescheduled"
                ),
                None => info!(
                    task_id = task.id,
                    hook = %task.hook,
                    status = %entry.status,
                    "one-shot task removed"
                ),
            }
            processed += 1;
        }

        Ok(processed)
    }

    /// Schedule a recurring task, first due one interval from now.
    pub fn schedule_event(
        &self,
        hook: &str,
        interval_seconds: i64,
        args: Vec<Value>,
    ) -> Result<Task> {
        validate_interval(interval_seconds)?;
        let first = next_occurrence(self.clock.now(), interval_seconds);
        self.schedule_at(hook, first, args, Some(interval_seconds))
    }

    /// Schedule a task at an exact epoch second, optionally recurring.
    pub fn schedule_at(
        &self,
        hook: &str,
        timestamp: i64,
        args: Vec<Value>,
        interval_seconds: Option<i64>,
    ) -> Result<Task> {
        validate_hook_name(hook)?;
        if let Some(interval) = interval_seconds {
            validate_interval(interval)?;
        }
        self.repo.insert_task(NewTask {
            hook: hook.to_string(),
            args,
            scheduled_at: timestamp,
            interval_seconds,
        })
    }

    pub fn schedule_single_event(&self, hook: &str, timestamp: i64, args: Vec<Value>) -> Result<Task> {
        self.schedule_at(hook, timestamp, args, None)
    }

    /// Delete every pending task for `hook`. Log history is kept, and a run
    /// already in progress is not interrupted.
    pub fn unschedule_event(&self, hook: &str) -> Result<usize> {
        self.repo.delete_tasks_by_hook(hook)
    }

    /// When `hook` last finished successfully, read from the run log.
    pub fn last_run(&self, hook: &str) -> Result<Option<i64>> {
        self.repo.last_run(hook)
    }

    /// Earliest pending run for `hook`, if any.
    pub fn next_scheduled(&self, hook: &str) -> Result<Option<i64>> {
        self.repo.next_scheduled(hook)
    }

    /// Invoke `hook` immediately, outside the task table. The log entry has
    /// no task id.
    pub fn run_hook_now(&self, hook: &str, args: &[Value]) -> Result<LogEntry> {
        validate_hook_name(hook)?;
        self.execute(None, hook, args)
    }

    fn execute(&self, task_id: Option<i64>, hook: &str, args: &[Value]) -> Result<LogEntry> {
        let started_at = self.clock.now();
        let outcome = catch_unwind(AssertUnwindSafe(|| self.hooks.invoke(hook, args)));
        let finished_at = self.clock.now().max(started_at);

        let (status, message) = match outcome {
            Ok(outcome) => match outcome.failure_message() {
                None => (RunStatus::Success, None),
                Some(msg) => (RunStatus::Failure, Some(msg)),
            },
            Err(payload) => {
                let msg = format!("hook callback panicked: {}", panic_message(payload.as_ref()));
                error!(?task_id, hook, "{msg}");
                (RunStatus::Failure, Some(msg))
            }
        };

        let elapsed = finished_at - started_at;
        if elapsed >= self.slow_hook_warn_secs {
            warn!(?task_id, hook, elapsed_secs = elapsed, "slow hook");
        }

        self.repo.insert_log(NewLogEntry {
            task_id,
            hook: hook.to_string(),
            status,
            started_at,
            finished_at,
            message,
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
