//! Due-time arithmetic. No I/O and no clock access: callers pass `now`.

use crate::error::{Result, SchedulerError};

/// A task is due once its scheduled time is at or before `now`.
pub fn is_due(scheduled_at: i64, now: i64) -> bool {
    scheduled_at <= now
}

/// Next run of a recurring task, counted from the time the previous run was
/// *scheduled* for, not from when it actually ran.
///
/// Missed intervals are not backfilled: after downtime the task becomes due
/// once, one interval past its old slot.
pub fn next_occurrence(reference: i64, interval_seconds: i64) -> i64 {
    reference.saturating_add(interval_seconds)
}

/// Reject intervals that would never move a task forward.
pub fn validate_interval(interval_seconds: i64) -> Result<()> {
    if interval_seconds <= 0 {
        return Err(SchedulerError::InvalidSchedule(format!(
            "interval must be a positive number of seconds, got {interval_seconds}"
        )));
    }
    Ok(())
}

pub fn validate_hook_name(hook: &str) -> Result<()> {
    if hook.trim().is_empty() {
        return Err(SchedulerError::InvalidSchedule(
            "hook name must not be empty".to_string(),
        ));
    }
    Ok(())
}
