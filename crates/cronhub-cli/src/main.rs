//! `cronhub` — run and administer the task scheduler from the command line.
//!
//! Every subcommand opens the configured SQLite file, so a `daemon` and ad hoc
//! invocations can share one database.

mod app;
mod hooks;

use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use cronhub_campaign::{RecipientSource, ScheduleRequest};
use cronhub_core::clock::format_timestamp;
use cronhub_core::CronhubConfig;
use cronhub_scheduler::CronEngine;
use serde_json::Value;
use tracing::{info, warn};

use crate::app::App;

#[derive(Parser, Debug)]
#[command(name = "cronhub", about = "Persistent cron-style task scheduler")]
struct Cli {
    /// Path to the config file (default: ~/.cronhub/cronhub.toml).
    #[arg(long = "config", global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one pass over due tasks and exit.
    Run,

    /// Poll for due tasks until interrupted.
    Daemon {
        /// Override `runner.poll_interval_secs`.
        #[arg(long)]
        poll_secs: Option<u64>,
    },

    /// Schedule a recurring task, first due one interval from now.
    Schedule {
        #[arg(long)]
        hook: String,
        /// Interval in seconds.
        #[arg(long)]
        every: i64,
        /// Positional hook arguments as a JSON array.
        #[arg(long)]
        args: Option<String>,
    },

    /// Schedule a task at an exact time (epoch seconds or RFC 3339).
    ScheduleAt {
        #[arg(long)]
        hook: String,
        #[arg(long)]
        at: String,
        /// Make the task recurring with this interval in seconds.
        #[arg(long)]
        every: Option<i64>,
        #[arg(long)]
        args: Option<String>,
    },

    /// Remove every pending task for a hook.
    Unschedule {
        #[arg(long)]
        hook: String,
    },

    /// List pending tasks.
    List,

    /// Show recent runs, newest first.
    Log {
        #[arg(long)]
        hook: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Last successful run and next pending run of a hook.
    LastRun {
        #[arg(long)]
        hook: String,
    },

    /// List hooks with a registered callback.
    Hooks,

    /// Invoke a hook right now, outside the task table.
    Exec {
        #[arg(long)]
        hook: String,
        #[arg(long)]
        args: Option<String>,
    },

    /// Newsletter campaigns.
    Campaign {
        #[command(subcommand)]
        action: CampaignAction,
    },
}

#[derive(Subcommand, Debug)]
enum CampaignAction {
    /// Create a draft campaign.
    Create {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        body: String,
    },

    /// Schedule a campaign for batched delivery.
    Schedule {
        #[arg(long)]
        id: i64,
        /// First run (epoch seconds or RFC 3339); defaults to now.
        #[arg(long)]
        start: Option<String>,
        /// No run is started after this time.
        #[arg(long)]
        end: Option<String>,
        #[arg(long, default_value_t = 10)]
        interval_minutes: i64,
        #[arg(long, default_value_t = 10)]
        max_attempts: u32,
    },

    /// Run every due campaign schedule once.
    Process,

    /// Show a campaign and its delivery counters.
    Show {
        #[arg(long)]
        id: i64,
    },

    /// Add or update a newsletter subscriber.
    Subscribe {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: Option<String>,
        /// Store the subscriber as unconfirmed.
        #[arg(long)]
        unconfirmed: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cronhub=info,cronhub_hooks=info,cronhub_scheduler=info,cronhub_campaign=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // explicit --config > CRONHUB_CONFIG env > ~/.cronhub/cronhub.toml
    let config_path = cli.config.or_else(|| std::env::var("CRONHUB_CONFIG").ok());
    let config = CronhubConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({e}), using defaults");
        CronhubConfig::default()
    });

    let app = App::open(config)?;
    match cli.command {
        Commands::Run => {
            hooks::ensure_builtin_tasks(&app.manager)?;
            let processed = app.manager.run_due_tasks()?;
            println!("{processed} task(s) processed");
        }
        Commands::Daemon { poll_secs } => daemon(app, poll_secs).await?,
        Commands::Schedule { hook, every, args } => {
            let task = app.manager.schedule_event(&hook, every, parse_args(args.as_deref())?)?;
            println!("task {} scheduled for {}", task.id, format_timestamp(task.scheduled_at));
        }
        Commands::ScheduleAt {
            hook,
            at,
            every,
            args,
        } => {
            let at = parse_timestamp(&at)?;
            let task = app
                .manager
                .schedule_at(&hook, at, parse_args(args.as_deref())?, every)?;
            println!("task {} scheduled for {}", task.id, format_timestamp(task.scheduled_at));
        }
        Commands::Unschedule { hook } => {
            let removed = app.manager.unschedule_event(&hook)?;
            println!("{removed} task(s) removed");
        }
        Commands::List => {
            let tasks = app.manager.repository().list_tasks()?;
            println!("{}", serde_json::to_string_pretty(&tasks)?);
        }
        Commands::Log { hook, limit } => {
            let entries = app.manager.repository().recent_logs(hook.as_deref(), limit)?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        Commands::LastRun { hook } => {
            let show = |ts: Option<i64>| ts.map(format_timestamp).unwrap_or_else(|| "never".into());
            println!("last run: {}", show(app.manager.last_run(&hook)?));
            println!("next run: {}", show(app.manager.next_scheduled(&hook)?));
        }
        Commands::Hooks => {
            for hook in app.hooks.hooks() {
                println!("{hook}");
            }
        }
        Commands::Exec { hook, args } => {
            let entry = app.manager.run_hook_now(&hook, &parse_args(args.as_deref())?)?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        Commands::Campaign { action } => campaign(&app, action)?,
    }
    Ok(())
}

async fn daemon(app: App, poll_secs: Option<u64>) -> anyhow::Result<()> {
    hooks::ensure_builtin_tasks(&app.manager)?;

    let poll = poll_secs.unwrap_or(app.config.runner.poll_interval_secs).max(1);
    let engine = CronEngine::new(app.manager.clone(), Duration::from_secs(poll));
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(engine.run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl-c")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    handle.await?;
    Ok(())
}

fn campaign(app: &App, action: CampaignAction) -> anyhow::Result<()> {
    let now = app.clock.now();
    match action {
        CampaignAction::Create { subject, body } => {
            let campaign = app.campaigns.create_campaign(&subject, &body, now)?;
            println!("campaign {} created", campaign.id);
        }
        CampaignAction::Schedule {
            id,
            start,
            end,
            interval_minutes,
            max_attempts,
        } => {
            let start_at = match start {
                Some(s) => parse_timestamp(&s)?,
                None => now,
            };
            let end_at = end.as_deref().map(parse_timestamp).transpose()?;
            let schedule = app.campaigns.schedule_campaign(
                ScheduleRequest {
                    campaign_id: id,
                    start_at,
                    end_at,
                    interval_minutes,
                    max_attempts,
                },
                now,
            )?;
            println!(
                "campaign {id} scheduled (schedule {}), {} confirmed recipient(s)",
                schedule.id,
                app.subscribers.total()?
            );
        }
        CampaignAction::Process => {
            let reports = app.processor.process_due(now)?;
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        CampaignAction::Show { id } => {
            let Some(campaign) = app.campaigns.get_campaign(id)? else {
                bail!("campaign {id} not found");
            };
            println!("{}", serde_json::to_string_pretty(&campaign)?);
        }
        CampaignAction::Subscribe {
            email,
            name,
            unconfirmed,
        } => {
            let id = app
                .subscribers
                .upsert_subscriber(&email, name.as_deref(), !unconfirmed, now)?;
            println!("subscriber {id} saved");
        }
    }
    Ok(())
}

/// Hook arguments arrive as a JSON array; a single non-array value becomes a
/// one-element list.
fn parse_args(raw: Option<&str>) -> anyhow::Result<Vec<Value>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    let value: Value =
        serde_json::from_str(raw).with_context(|| format!("--args is not valid JSON: {raw}"))?;
    Ok(match value {
        Value::Array(items) => items,
        other => vec![other],
    })
}

fn parse_timestamp(raw: &str) -> anyhow::Result<i64> {
    if let Ok(secs) = raw.trim().parse::<i64>() {
        return Ok(secs);
    }
    let parsed = chrono::DateTime::parse_from_rfc3339(raw.trim())
        .with_context(|| format!("expected epoch seconds or RFC 3339, got {raw:?}"))?;
    Ok(parsed.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn args_accept_array_or_scalar() {
        assert!(parse_args(None).unwrap().is_empty());
        assert_eq!(
            parse_args(Some(r#"["a", 2]"#)).unwrap(),
            vec![json!("a"), json!(2)]
        );
        assert_eq!(parse_args(Some(r#"{"k":1}"#)).unwrap(), vec![json!({"k": 1})]);
        assert!(parse_args(Some("not json")).is_err());
    }

    #[test]
    fn timestamps_accept_epoch_and_rfc3339() {
        assert_eq!(parse_timestamp("1700000000").unwrap(), 1_700_000_000);
        assert_eq!(parse_timestamp("1970-01-01T00:05:00Z").unwrap(), 300);
        assert_eq!(parse_timestamp("2023-11-14T22:13:20+00:00").unwrap(), 1_700_000_000);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn cli_parses_schedule_at() {
        let cli = Cli::try_parse_from([
            "cronhub",
            "schedule-at",
            "--hook",
            "fake_hook",
            "--at",
            "1000",
            "--every",
            "300",
        ])
        .unwrap();
        match cli.command {
            Commands::ScheduleAt { hook, every, .. } => {
                assert_eq!(hook, "fake_hook");
                assert_eq!(every, Some(300));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
