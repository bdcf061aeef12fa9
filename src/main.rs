//! # events-alerts CLI
//!
//! Polls the operations database for matching events and notifies by email
//! and Microsoft Teams, re-notifying only after the reminder interval.
//!
//! Usage:
//!   events-alerts                          # Run the polling loop (default)
//!   events-alerts once                     # Single cycle, then exit
//!   events-alerts status                   # Summarise the fingerprint store
//!   events-alerts prune --older-than-days 90
//!   events-alerts check-db                 # Test database connectivity
//!   events-alerts test-webhook             # Post a test card to Teams
//!   events-alerts config show              # Effective config, secrets masked

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use alerts_channels::render::format_timestamp;
use alerts_channels::{EmailChannel, LogoSet, MessageRenderer, SmtpMailer, TeamsWebhookChannel};
use alerts_core::config::{LoggingConfig, MAX_RETENTION_DAYS, expand_path};
use alerts_core::types::Audience;
use alerts_core::{AlertsConfig, EventSource};
use alerts_db::PostgresEventSource;
use alerts_scheduler::{
    ChannelRoute, FingerprintStore, NotifyRouter, SchedulerEngine, is_due, prune_cutoff,
    prune_records,
};
use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "events-alerts",
    version,
    about = "Event notifications with reminder-aware dedup",
    long_about = "Polls a database for operational events and notifies by email and Microsoft Teams.\nAn event is notified once, then again only after the reminder interval has elapsed."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path (default: alerts.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log what would be sent without sending or recording anything
    #[arg(long, global = true)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the polling loop until SIGINT/SIGTERM
    Run,

    /// Run a single cycle and exit (non-zero if the cycle failed)
    Once,

    /// Show the fingerprint store
    Status,

    /// Remove fingerprints not notified recently
    Prune {
        /// Age threshold in days (defaults to schedule.retention_days)
        #[arg(long)]
        older_than_days: Option<f64>,
    },

    /// Check database connectivity and count matching events
    CheckDb,

    /// Post a test card to the Teams webhook
    TestWebhook,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration with secrets masked
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match AlertsConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            let _guard = init_logging(&LoggingConfig { dir: None, ..Default::default() }, cli.verbose);
            error!("Failed to load configuration: {e}");
            return Err(e.into());
        }
    };
    let _guard = init_logging(&config.logging, cli.verbose);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let mut engine = build_engine(&config, cli.dry_run).await?;
            info!("events-alerts v{} starting", env!("CARGO_PKG_VERSION"));
            engine.run(shutdown_token()).await;
        }

        Commands::Once => {
            let engine = build_engine(&config, cli.dry_run).await?;
            let report = engine
                .run_cycle(&shutdown_token())
                .await
                .context("cycle failed")?;
            info!("cycle complete: {report}");
        }

        Commands::Status => {
            let store = FingerprintStore::new(config.store.resolved_path());
            let map = store.try_load()?;
            let reminder = config.schedule.reminder_interval()?;
            let now = Utc::now();
            let tz = config.branding.tz()?;

            println!("Fingerprint store: {}", store.path().display());
            println!("Records: {}", map.len());
            if !map.is_empty() {
                let mut records: Vec<_> = map.values().collect();
                records.sort_by(|a, b| b.last_notified_at.cmp(&a.last_notified_at));
                println!(
                    "\n{:<12} {:>5}  {:<22} {:<22} {:<5} CHANNELS",
                    "EVENT", "COUNT", "FIRST", "LAST", "DUE"
                );
                for r in records {
                    let channels: Vec<&str> = r.channels_last_used.iter().map(String::as_str).collect();
                    println!(
                        "{:<12} {:>5}  {:<22} {:<22} {:<5} {}",
                        r.event_id,
                        r.notify_count,
                        format_timestamp(&r.first_notified_at, tz),
                        format_timestamp(&r.last_notified_at, tz),
                        if is_due(Some(r), now, reminder) { "yes" } else { "no" },
                        channels.join(",")
                    );
                }
            }
        }

        Commands::Prune { older_than_days } => {
            let older_than = match older_than_days {
                Some(days) if days.is_finite() && days > 0.0 && days <= MAX_RETENTION_DAYS => {
                    chrono::Duration::try_milliseconds((days * 86_400_000.0) as i64)
                        .context("--older-than-days is out of range")?
                }
                Some(days) => {
                    bail!("--older-than-days must be in (0, {MAX_RETENTION_DAYS}], got {days}")
                }
                None => config
                    .schedule
                    .retention()?
                    .context("pass --older-than-days or set schedule.retention_days")?,
            };
            let store = FingerprintStore::new(config.store.resolved_path());
            if cli.dry_run {
                let mut map = store.try_load()?;
                let n = prune_cutoff(Utc::now(), older_than)
                    .map_or(0, |cutoff| prune_records(&mut map, cutoff));
                println!("Would remove {n} record(s) from {}", store.path().display());
            } else {
                let n = store.prune(older_than, Utc::now())?;
                println!("Removed {n} record(s) from {}", store.path().display());
            }
        }

        Commands::CheckDb => {
            let source = PostgresEventSource::connect(&config.database).await?;
            source.check_connection().await?;
            println!(
                "Database connection OK ({}:{}/{})",
                config.database.host, config.database.port, config.database.name
            );

            let events = tokio::time::timeout(
                config.schedule.source_timeout(),
                source.fetch_candidates(&config.filter),
            )
            .await
            .context("query timed out")??;
            println!("{} event(s) match the current filter", events.len());
            if let Some(name) = resolve_type_name(&config, &source).await {
                println!("Event type {} is '{name}'", config.filter.type_id);
            }
        }

        Commands::TestWebhook => {
            if config.teams.webhook_url.trim().is_empty() {
                bail!("TEAMS_WEBHOOK_URL is not configured");
            }
            let renderer = Arc::new(MessageRenderer::new(config.branding.clone()));
            let channel = TeamsWebhookChannel::new(&config.teams, renderer)?;
            channel.send_test_card().await?;
            println!("Test card delivered to the Teams webhook");
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                print!("{}", config.to_masked_toml()?);
            }
        },
    }

    Ok(())
}

/// Validate config and wire source, channels and store into an engine.
async fn build_engine(config: &AlertsConfig, dry_run: bool) -> Result<SchedulerEngine> {
    config.validate()?;
    let source = PostgresEventSource::connect(&config.database)
        .await?
        .with_timezone(config.branding.tz()?);
    let type_name = resolve_type_name(config, &source).await;
    let router = build_router(config, type_name)?;
    Ok(SchedulerEngine::from_config(config, Arc::new(source), router, dry_run)?)
}

/// Event type display name from the database, or `None` to keep the configured one.
async fn resolve_type_name(config: &AlertsConfig, source: &PostgresEventSource) -> Option<String> {
    let lookup = tokio::time::timeout(
        config.schedule.source_timeout(),
        source.fetch_type_name(&config.filter),
    )
    .await;
    match lookup {
        Ok(Ok(Some(name))) => {
            info!("event type {} is '{name}'", config.filter.type_id);
            Some(name)
        }
        Ok(Ok(None)) => None,
        Ok(Err(e)) => {
            warn!(
                "event type name lookup failed, using '{}': {e}",
                config.branding.event_type_name
            );
            None
        }
        Err(_) => {
            warn!(
                "event type name lookup timed out, using '{}'",
                config.branding.event_type_name
            );
            None
        }
    }
}

/// One route per enabled channel; disabled channels are never constructed.
fn build_router(config: &AlertsConfig, type_name: Option<String>) -> Result<NotifyRouter> {
    let mut renderer = MessageRenderer::new(config.branding.clone());
    if let Some(name) = type_name {
        renderer = renderer.with_event_type_name(name);
    }
    let renderer = Arc::new(renderer);
    let mut routes = Vec::new();

    if config.email.enabled || config.teams_email.enabled {
        let mailer = Arc::new(SmtpMailer::from_config(&config.email)?);
        if config.email.enabled {
            let logos = Arc::new(LogoSet::load(&config.branding));
            routes.push(ChannelRoute::new(
                Arc::new(EmailChannel::internal(mailer.clone(), renderer.clone(), logos)),
                Audience::new("internal", config.email.recipients.clone()),
            ));
        }
        if config.teams_email.enabled {
            routes.push(ChannelRoute::new(
                Arc::new(EmailChannel::teams_mailbox(mailer, renderer.clone())),
                Audience::new("teams-mailbox", vec![config.teams_email.address.clone()]),
            ));
        }
    }

    if config.teams.enabled {
        routes.push(ChannelRoute::new(
            Arc::new(TeamsWebhookChannel::new(&config.teams, renderer)?),
            Audience::endpoint("teams-webhook"),
        ));
    }

    if routes.is_empty() {
        warn!("All notification channels are disabled; events will be fetched but not sent");
    }
    Ok(NotifyRouter::new(routes, config.schedule.send_timeout()))
}

/// Console logging plus an optional daily-rotated file.
///
/// The returned guard flushes the file writer on drop; hold it for the
/// process lifetime.
fn init_logging(config: &LoggingConfig, verbose: bool) -> Option<WorkerGuard> {
    let level = if verbose { "debug" } else { "info" };
    let default = ["events_alerts", "alerts", "alerts_core", "alerts_scheduler", "alerts_channels", "alerts_db"]
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let mut guard = None;
    let file_layer = config.dir.as_deref().and_then(|dir| {
        let dir = expand_path(dir);
        if let Err(e) = std::fs::create_dir_all(&dir) {
            eprintln!("Cannot create log directory {}: {e}", dir.display());
            return None;
        }
        let appender = tracing_appender::rolling::Builder::new()
            .rotation(tracing_appender::rolling::Rotation::DAILY)
            .filename_prefix(&config.file)
            .max_log_files(config.max_files.max(1))
            .build(&dir);
        match appender {
            Ok(appender) => {
                let (writer, g) = tracing_appender::non_blocking(appender);
                guard = Some(g);
                Some(fmt::layer().with_ansi(false).with_writer(writer))
            }
            Err(e) => {
                eprintln!("Cannot open log file in {}: {e}", dir.display());
                None
            }
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();
    guard
}

/// Cancelled on Ctrl-C or SIGTERM.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received, finishing current step");
        trigger.cancel();
    });
    token
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("Cannot install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
