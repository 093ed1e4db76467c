//! # Commbot — community operations bot
//!
//! Usage:
//!   commbot                           # Run with ~/.commbot/config.toml
//!   commbot --config ./bot.toml       # Custom config
//!   commbot --check-config            # Validate config and exit

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;
use commbot_bridge::{
    BotContext, FeatureFlags, HealthSupervisor, HealthTiming, OperatorAlerts, RecentResponders,
    SinkRoutes, SinkWorker, SourceWorker, Subsystem, WorkerTiming,
};
use commbot_channels::{
    DiscordChannel, HttpFeedClient, HttpPlanSource, HttpRenderer, HttpScheduleSource,
};
use commbot_core::BotConfig;
use commbot_core::traits::{DeliveryLog, FeedKind, NotificationSink};
use commbot_core::types::{Destination, QueueName};
use commbot_scheduler::{
    AutoUpdatePoller, BotDb, PeriodicRunner, ReconcileSettings, ReminderScheduler, TaskReconciler,
};
use tracing_subscriber::EnvFilter;

const FEEDS: [(FeedKind, QueueName, Subsystem); 4] = [
    (FeedKind::Submissions, QueueName::Submissions, Subsystem::SubmissionFeed),
    (FeedKind::Comments, QueueName::Comments, Subsystem::CommentFeed),
    (FeedKind::ModMail, QueueName::ModMail, Subsystem::ModMailFeed),
    (FeedKind::ModLog, QueueName::ModLog, Subsystem::ModLogFeed),
];

/// How long the mod-mail sink remembers who answered a conversation.
const RESPONDER_MEMORY_DAYS: i64 = 7;

#[derive(Parser)]
#[command(name = "commbot", version, about = "🤖 Commbot — community operations bot")]
struct Cli {
    /// Config file (default: ~/.commbot/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "commbot=debug,commbot_bridge=debug,commbot_scheduler=debug,commbot_channels=debug"
    } else {
        "commbot=info,commbot_bridge=info,commbot_scheduler=info,commbot_channels=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => BotConfig::load_from(&PathBuf::from(shellexpand::tilde(path).to_string()))?,
        None => BotConfig::load()?,
    };
    validate(&config)?;

    if cli.check_config {
        println!("✅ Configuration OK");
        return Ok(());
    }

    run(config).await
}

fn validate(config: &BotConfig) -> Result<()> {
    if config.discord.bot_token.is_empty() {
        bail!("discord.bot_token is required");
    }
    if config.channels.operator.is_empty() {
        bail!("channels.operator is required: operator alerts need somewhere to go");
    }
    ReconcileSettings::from_config(&config.reconcile)?;
    Ok(())
}

async fn run(config: BotConfig) -> Result<()> {
    tracing::info!("🤖 Commbot v{} starting", env!("CARGO_PKG_VERSION"));

    let ctx = BotContext::new(FeatureFlags::from_config(&config));
    let timing = WorkerTiming::from_config(&config.workers);
    let db = BotDb::open(&config.db_path()).await?;
    let discord = Arc::new(DiscordChannel::new(&config.discord)?);

    let alerts = ctx.queues.sender(QueueName::Alerts);
    let operator_channel = Destination::Channel(config.channels.operator.clone());
    let operator = OperatorAlerts::new(alerts.clone(), operator_channel.clone());

    let mut supervisor = HealthSupervisor::new(
        ctx.heartbeats.clone(),
        ctx.crashes.clone(),
        operator.clone(),
        HealthTiming::from_config(&config.health, config.workers.crash_threshold),
        config.marker_path(),
        ctx.flags.switch(Subsystem::Health),
    );

    // ─── Sources: one OS thread per feed ────────────────────
    if config.feed.base_url.is_empty() {
        tracing::warn!("⚠️ feed.base_url not set, no feed sources started");
    } else {
        for (feed, queue, subsystem) in FEEDS {
            if !ctx.flags.is_enabled(subsystem) {
                tracing::info!("⏸️ {feed} source disabled");
                continue;
            }
            let worker = SourceWorker::new(
                feed,
                Box::new(HttpFeedClient::new(&config.feed)?),
                ctx.queues.sender(queue),
                ctx.heartbeats.clone(),
                ctx.crashes.clone(),
                Some(operator.clone()),
                ctx.flags.switch(subsystem),
                timing.clone(),
            );
            let handle = worker.spawn()?;
            supervisor.watch_thread(handle.name().to_string(), Box::new(handle));
        }
    }

    // ─── Sinks: one task per queue ──────────────────────────
    if ctx.flags.is_enabled(Subsystem::Sinks) {
        let routes = SinkRoutes::new()
            .with_channel(QueueName::Submissions, &config.channels.submissions)
            .with_channel(QueueName::Comments, &config.channels.comments)
            .with_channel(QueueName::ModMail, &config.channels.modmail)
            .with_channel(QueueName::ModLog, &config.channels.modlog);
        let sink: Arc<dyn NotificationSink> = discord.clone();
        let log: Arc<dyn DeliveryLog> = Arc::new(db.clone());
        let responders = RecentResponders::new();

        for queue in QueueName::ALL {
            let Some(receiver) = ctx.queues.take_receiver(queue) else {
                continue;
            };
            let mut worker = SinkWorker::new(
                receiver,
                sink.clone(),
                routes.clone(),
                ctx.heartbeats.clone(),
                ctx.flags.switch(Subsystem::Sinks),
                timing.clone(),
            )
            .with_log(log.clone());
            if queue == QueueName::ModMail {
                worker = worker.with_responders(responders.clone());
            }
            // The alerts sink must not report its own drops back onto its queue.
            if queue != QueueName::Alerts {
                worker = worker.with_operator(operator.clone());
            }
            supervisor.watch_cooperative(worker.name().to_string());
            tokio::spawn(async move {
                let exit = worker.run().await;
                tracing::info!("🔚 sink:{queue} exited: {exit:?}");
            });
        }

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(3600));
            loop {
                interval.tick().await;
                responders.prune_before(chrono::Utc::now() - chrono::Duration::days(RESPONDER_MEMORY_DAYS));
            }
        });
    } else {
        tracing::warn!("⏸️ Sinks disabled, queued items will not be delivered");
    }

    // ─── Reminders ──────────────────────────────────────────
    let reminders = ReminderScheduler::gated(
        db.clone(),
        alerts.clone(),
        ctx.flags.switch(Subsystem::Reminders),
    );
    if ctx.flags.is_enabled(Subsystem::Reminders) {
        reminders.reload().await?;
    }

    // ─── Task reconciler ────────────────────────────────────
    let rc = &config.reconcile;
    if !ctx.flags.is_enabled(Subsystem::Reconcile) {
        tracing::info!("⏸️ Reconciler disabled");
    } else if rc.plan_url.is_empty() || rc.schedule_url.is_empty() {
        tracing::warn!("⚠️ reconcile.plan_url / schedule_url not set, reconciler not started");
    } else {
        let fetch_timeout = Duration::from_secs(rc.fetch_timeout_secs);
        let announcements = if config.channels.announcements.is_empty() {
            operator_channel.clone()
        } else {
            Destination::Channel(config.channels.announcements.clone())
        };
        let mut reconciler = TaskReconciler::new(
            Arc::new(HttpPlanSource::new(&rc.plan_url, fetch_timeout)?),
            Arc::new(HttpScheduleSource::new(&rc.schedule_url, fetch_timeout)?),
            db.clone(),
            reminders.clone(),
            alerts.clone(),
            announcements,
            operator.clone(),
            ReconcileSettings::from_config(rc)?,
        );
        reconciler.load_dedup().await?;
        let runner = PeriodicRunner::new(
            Duration::from_secs(rc.interval_secs),
            ctx.flags.switch(Subsystem::Reconcile),
            ctx.heartbeats.clone(),
            ctx.crashes.clone(),
            timing.clone(),
        )
        .with_operator(operator.clone());
        tokio::spawn(async move {
            let exit = runner.run(reconciler).await;
            tracing::info!("🔚 reconciler exited: {exit:?}");
        });
    }

    // ─── Auto-update poller ─────────────────────────────────
    let au = &config.autoupdate;
    if !ctx.flags.is_enabled(Subsystem::AutoUpdate) {
        tracing::info!("⏸️ Auto-update disabled");
    } else if au.renderer_url.is_empty() {
        tracing::warn!("⚠️ autoupdate.renderer_url not set, poller not started");
    } else {
        let renderer = HttpRenderer::new(
            &au.renderer_url,
            Duration::from_secs(config.feed.request_timeout_secs),
        )?;
        let mut poller = AutoUpdatePoller::new(
            db.clone(),
            Arc::new(renderer),
            discord.clone(),
            ctx.crashes.clone(),
            timing.clone(),
        )
        .with_operator(operator.clone());
        for target in &au.targets {
            poller.add_target(target).await?;
        }
        let runner = PeriodicRunner::new(
            Duration::from_secs(au.interval_secs),
            ctx.flags.switch(Subsystem::AutoUpdate),
            ctx.heartbeats.clone(),
            ctx.crashes.clone(),
            timing.clone(),
        )
        .with_operator(operator.clone());
        tokio::spawn(async move {
            let exit = runner.run(poller).await;
            tracing::info!("🔚 auto-update exited: {exit:?}");
        });
    }

    // ─── Health supervisor ──────────────────────────────────
    if ctx.flags.is_enabled(Subsystem::Health) {
        tracing::info!("🩺 Watching: {}", supervisor.watched().join(", "));
        tokio::spawn(async move {
            let state = supervisor.run().await;
            tracing::info!("🔚 health supervisor exited: {state:?}");
        });
    }

    tracing::info!("✅ Commbot running, Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("👋 Shutting down");
    for subsystem in Subsystem::ALL {
        ctx.flags.switch(subsystem).set(false);
    }
    Ok(())
}
