//! Narrow interfaces to the outside world: who receives a campaign and how
//! mail leaves the system.

use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection};
use thiserror::Error;
use tracing::info;

use crate::db::init_db;
use crate::error::{CampaignError, Result};
use crate::types::{OutgoingMail, Recipient};

/// Confirmed newsletter recipients, read in stable pages.
pub trait RecipientSource: Send + Sync {
    fn total(&self) -> Result<u64>;

    /// Up to `limit` recipients starting at `offset`, in a stable order.
    fn page(&self, offset: u64, limit: u32) -> Result<Vec<Recipient>>;
}

#[derive(Debug, Error)]
pub enum MailError {
    /// The receiving side refused this message (bad address, mailbox full).
    #[error("rejected: {0}")]
    Rejected(String),

    /// The transport itself failed.
    #[error("transport error: {0}")]
    Transport(String),
}

pub trait MailSender: Send + Sync {
    fn send(&self, to: &Recipient, mail: &OutgoingMail) -> std::result::Result<(), MailError>;
}

/// Reads confirmed rows of `newsletter_subscribers`.
pub struct SqliteRecipientSource {
    db: Mutex<Connection>,
}

impl SqliteRecipientSource {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    fn db(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| CampaignError::LockPoisoned)
    }

    /// Insert or update a subscriber by email. Returns the row id.
    pub fn upsert_subscriber(
        &self,
        email: &str,
        name: Option<&str>,
        confirmed: bool,
        now: i64,
    ) -> Result<i64> {
        let db = self.db()?;
        db.execute(
            "INSERT INTO newsletter_subscribers (email, name, confirmed, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(email) DO UPDATE SET name = excluded.name, confirmed = excluded.confirmed",
            params![email, name, confirmed as i32, now],
        )?;
        let id = db.query_row(
            "SELECT id FROM newsletter_subscribers WHERE email = ?1",
            [email],
            |row| row.get(0),
        )?;
        Ok(id)
    }
}

impl RecipientSource for SqliteRecipientSource {
    fn total(&self) -> Result<u64> {
        let n: i64 = self.db()?.query_row(
            "SELECT COUNT(*) FROM newsletter_subscribers WHERE confirmed = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(n.max(0) as u64)
    }

    fn page(&self, offset: u64, limit: u32) -> Result<Vec<Recipient>> {
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        let db = self.db()?;
        let mut stmt = db.prepare_cached(
            "SELECT id, email, name FROM newsletter_subscribers
             WHERE confirmed = 1 ORDER BY id LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt
            .query_map(params![limit, offset], |row| {
                Ok(Recipient {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    name: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

/// Stand-in transport that only records the send in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailSender;

impl MailSender for LogMailSender {
    fn send(&self, to: &Recipient, mail: &OutgoingMail) -> std::result::Result<(), MailError> {
        if !to.email.contains('@') {
            return Err(MailError::Rejected(format!("invalid address: {}", to.email)));
        }
        info!(recipient = %to.email, subject = %mail.subject, "mail sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_confirmed_subscribers_are_paged() {
        let source = SqliteRecipientSource::new(Connection::open_in_memory().unwrap()).unwrap();
        for (i, confirmed) in [true, false, true, true, false].into_iter().enumerate() {
            source
                .upsert_subscriber(&format!("user{i}@example.com"), None, confirmed, 0)
                .unwrap();
        }

        assert_eq!(source.total().unwrap(), 3);
        let first = source.page(0, 2).unwrap();
        assert_eq!(
            first.iter().map(|r| r.email.as_str()).collect::<Vec<_>>(),
            vec!["user0@example.com", "user2@example.com"]
        );
        let rest = source.page(2, 2).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].email, "user3@example.com");
        assert!(source.page(3, 2).unwrap().is_empty());
    }

    #[test]
    fn upsert_updates_confirmation() {
        let source = SqliteRecipientSource::new(Connection::open_in_memory().unwrap()).unwrap();
        let id = source.upsert_subscriber("a@example.com", Some("A"), false, 0).unwrap();
        assert_eq!(source.total().unwrap(), 0);

        let again = source.upsert_subscriber("a@example.com", Some("A"), true, 1).unwrap();
        assert_eq!(id, again);
        assert_eq!(source.total().unwrap(), 1);
    }

    #[test]
    fn log_sender_rejects_malformed_address() {
        let mail = OutgoingMail {
            subject: "s".to_string(),
            body: "b".to_string(),
        };
        let bad = Recipient {
            id: 1,
            email: "nobody".to_string(),
            name: None,
        };
        assert!(matches!(
            LogMailSender.send(&bad, &mail),
            Err(MailError::Rejected(_))
        ));
    }
}
