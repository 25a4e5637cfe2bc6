//! `cronhub-core` — pieces shared by every cronhub crate: the replaceable
//! [`clock::Clock`], layered configuration and the top-level error type.

pub mod clock;
pub mod config;
pub mod error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CronhubConfig;
pub use error::{CronhubError, Result};
