//! Time source for everything that decides "is it due yet".
//!
//! Production code uses [`SystemClock`]; tests and dry runs use
//! [`ManualClock`] so time can be moved forward without sleeping.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};

/// A replaceable source of the current time in integer epoch seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// Reads the real wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        Utc::now().timestamp()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, timestamp: i64) {
        self.now.store(timestamp, Ordering::SeqCst);
    }

    /// Move the clock forward by `secs` and return the new time.
    pub fn advance(&self, secs: i64) -> i64 {
        self.now.fetch_add(secs, Ordering::SeqCst) + secs
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Render an epoch timestamp as RFC 3339 for logs and CLI output.
///
/// Out-of-range values fall back to the raw number.
pub fn format_timestamp(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}
