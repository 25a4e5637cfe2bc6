//! `cronhub-campaign` — newsletter campaign delivery in recipient batches.
//!
//! Each campaign gets a schedule row with its own attempt budget. A run
//! sends one page of confirmed recipients (`offset = attempts * batch_size`),
//! then either completes the campaign, gives up (attempts exhausted or the
//! send window closed), or books the next run `interval_minutes` later.
//!
//! Mail transport and the subscriber list are collaborators behind
//! [`collaborators::MailSender`] and [`collaborators::RecipientSource`].

pub mod collaborators;
pub mod db;
pub mod error;
pub mod processor;
pub mod store;
pub mod types;

pub use collaborators::{LogMailSender, MailError, MailSender, RecipientSource, SqliteRecipientSource};
pub use error::{CampaignError, Result};
pub use processor::CampaignProcessor;
pub use store::{CampaignStore, DEFAULT_CLAIM_LEASE_SECS};
pub use types::{
    Campaign, CampaignSchedule, CampaignStatus, Delivery, DeliveryStatus, OutgoingMail, Recipient,
    RunReport, ScheduleRequest, ScheduleStatus,
};
