use std::sync::Arc;

use anyhow::Context;
use cronhub_campaign::{CampaignProcessor, CampaignStore, LogMailSender, SqliteRecipientSource};
use cronhub_core::{Clock, CronhubConfig, SystemClock};
use cronhub_hooks::HookRegistry;
use cronhub_scheduler::{Manager, SqliteTaskRepository};
use rusqlite::Connection;
use tracing::info;

use crate::hooks::register_builtin_hooks;

/// Every subsystem, wired together once per process.
pub struct App {
    pub config: CronhubConfig,
    pub clock: Arc<dyn Clock>,
    pub hooks: Arc<HookRegistry>,
    pub manager: Arc<Manager>,
    pub campaigns: Arc<CampaignStore>,
    pub subscribers: Arc<SqliteRecipientSource>,
    pub processor: Arc<CampaignProcessor>,
}

/// One connection per subsystem, all on the same database.
pub struct Connections {
    pub tasks: Connection,
    pub campaigns: Connection,
    pub subscribers: Connection,
}

impl App {
    /// Open (and migrate) the configured SQLite file.
    pub fn open(config: CronhubConfig) -> anyhow::Result<Self> {
        let db_path = config.database.path.clone();
        ensure_parent_dir(&db_path)?;
        info!(path = %db_path, "opening SQLite database");

        let open = || -> anyhow::Result<Connection> {
            let conn = Connection::open(&db_path)
                .with_context(|| format!("opening database {db_path}"))?;
            // WAL lets a daemon and ad hoc CLI calls share the file.
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
            Ok(conn)
        };

        let connections = Connections {
            tasks: open()?,
            campaigns: open()?,
            subscribers: open()?,
        };
        Self::build(config, Arc::new(SystemClock), connections)
    }

    pub fn build(
        config: CronhubConfig,
        clock: Arc<dyn Clock>,
        connections: Connections,
    ) -> anyhow::Result<Self> {
        let repo = Arc::new(SqliteTaskRepository::new(connections.tasks)?);
        let campaigns = Arc::new(
            CampaignStore::new(connections.campaigns)?
                .with_claim_lease(config.campaign.claim_lease_secs),
        );
        let subscribers = Arc::new(SqliteRecipientSource::new(connections.subscribers)?);
        let processor = Arc::new(CampaignProcessor::new(
            campaigns.clone(),
            subscribers.clone(),
            Arc::new(LogMailSender),
            config.campaign.batch_size,
        )?);

        // Persisted tasks only name their hook; callbacks are re-registered
        // on every boot.
        let hooks = Arc::new(HookRegistry::new());
        register_builtin_hooks(&hooks, processor.clone(), clock.clone());

        let manager = Arc::new(
            Manager::new(repo, hooks.clone(), clock.clone())
                .with_slow_hook_warning(config.runner.slow_hook_warn_secs),
        );
        info!(hooks = ?hooks.hooks(), "cronhub ready");

        Ok(Self {
            config,
            clock,
            hooks,
            manager,
            campaigns,
            subscribers,
            processor,
        })
    }
}

fn ensure_parent_dir(path: &str) -> anyhow::Result<()> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    Ok(())
}
