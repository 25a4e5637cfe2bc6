//! `cronhub-scheduler` — persisted cron tasks driven through named hooks.
//!
//! # Overview
//!
//! Tasks live in the SQLite `cron_tasks` table and point at a hook name plus
//! JSON arguments. [`manager::Manager::run_due_tasks`] claims every task whose
//! `scheduled_at` has passed, invokes its hook through the
//! [`cronhub_hooks::HookRegistry`], appends one row to `cron_log`, and either
//! moves a recurring task forward by its interval or removes a one-shot task.
//!
//! | Task kind  | `interval_seconds` | After a run (success or failure)          |
//! |------------|--------------------|-------------------------------------------|
//! | One-shot   | `NULL`             | Deleted                                   |
//! | Recurring  | `N > 0`            | `scheduled_at += N` (fixed cadence)       |
//!
//! [`engine::CronEngine`] is a ready-made trigger that calls the manager on a
//! fixed poll interval; any other trigger (HTTP ping, OS cron) can call
//! `run_due_tasks` directly.

pub mod db;
pub mod engine;
pub mod error;
pub mod manager;
pub mod repository;
pub mod schedule;
pub mod types;

pub use engine::CronEngine;
pub use error::{Result, SchedulerError};
pub use manager::Manager;
pub use repository::{SqliteTaskRepository, TaskRepository};
pub use types::{LogEntry, NewLogEntry, NewTask, RunStatus, Task};
