use rusqlite::{Connection, Result};

/// Initialise all tables for the campaign subsystem (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_campaigns_table(conn)?;
    create_schedules_table(conn)?;
    create_deliveries_table(conn)?;
    create_subscribers_table(conn)?;
    Ok(())
}

fn create_campaigns_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS campaigns (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            subject      TEXT    NOT NULL,
            body         TEXT    NOT NULL,
            status       TEXT    NOT NULL DEFAULT 'draft',
            sent_count   INTEGER NOT NULL DEFAULT 0,
            failed_count INTEGER NOT NULL DEFAULT 0,
            created_at   INTEGER NOT NULL,
            updated_at   INTEGER NOT NULL
        );",
    )
}

fn create_schedules_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS campaign_schedules (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            campaign_id      INTEGER NOT NULL REFERENCES campaigns (id) ON DELETE CASCADE,
            status           TEXT    NOT NULL DEFAULT 'scheduled',
            start_at         INTEGER NOT NULL,
            end_at           INTEGER,           -- NULL: no send window limit
            interval_minutes INTEGER NOT NULL,
            max_attempts     INTEGER NOT NULL,
            attempts         INTEGER NOT NULL DEFAULT 0,
            next_run_at      INTEGER,           -- NULL: run once start_at passes
            last_run_at      INTEGER,
            created_at       INTEGER NOT NULL,
            updated_at       INTEGER NOT NULL,
            CHECK (attempts <= max_attempts)
        );
        CREATE INDEX IF NOT EXISTS idx_campaign_schedules_due
            ON campaign_schedules (status, next_run_at);",
    )
}

fn create_deliveries_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS campaign_deliveries (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            campaign_id  INTEGER NOT NULL,
            schedule_id  INTEGER NOT NULL,
            attempt      INTEGER NOT NULL,
            recipient    TEXT    NOT NULL,
            status       TEXT    NOT NULL,
            error        TEXT,
            attempted_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_campaign_deliveries_campaign
            ON campaign_deliveries (campaign_id, id);",
    )
}

fn create_subscribers_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS newsletter_subscribers (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            email      TEXT    NOT NULL UNIQUE,
            name       TEXT,
            confirmed  INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        );",
    )
}
