//! `cronhub-hooks` — named extension points.
//!
//! A hook is a string key with an ordered list of callbacks. Persisted tasks
//! only carry the hook *name*, so the application must register the same
//! hooks on every boot before the task manager runs.

pub mod error;
pub mod registry;
pub mod types;

pub use error::{HookError, Result};
pub use registry::HookRegistry;
pub use types::{HookCallback, HookOutcome};
