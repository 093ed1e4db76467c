//! Matches the editorial plan (List A) against the posts
//! the platform has actually scheduled (List B) and chases the gaps.
//!
//! Each cycle:
//! 1. Fetch both lists concurrently, each under its own deadline.
//! 2. Normalize rows to [`ScheduledEvent`]s; unreadable rows are reported once.
//! 3. Plan items with an exact trigger-time match are confirmed once.
//! 4. Unmatched plan items inside the warning window get a DM to the creator,
//!    plus an operator warning when they are close.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use commbot_bridge::{OperatorAlerts, QueueSender};
use commbot_core::config::ReconcileConfig;
use commbot_core::error::{BotError, Result};
use commbot_core::traits::{PlanSource, ScheduleSource};
use commbot_core::types::{
    Alert, Destination, Payload, PlanRow, Remindme, ScheduledEvent, ScheduledPostRow,
};

use crate::engine::{JobStatus, PeriodicJob};
use crate::persistence::{BotDb, DedupKind};
use crate::reminders::ReminderScheduler;

/// Tunables for one reconciler, resolved from `[reconcile]`.
#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub fetch_timeout: Duration,
    pub late_warned_reset: chrono::Duration,
    pub updater_reminder_offset: i64,
    pub warn_past: i64,
    pub warn_ahead: i64,
    pub operator_warn: i64,
    pub lookback: chrono::Duration,
    pub none_needed: String,
    pub plan_offset: FixedOffset,
}

impl ReconcileSettings {
    pub fn from_config(config: &ReconcileConfig) -> Result<Self> {
        let plan_offset = config
            .plan_utc_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                BotError::config(format!(
                    "plan_utc_offset_hours out of range: {}",
                    config.plan_utc_offset_hours
                ))
            })?;
        let late_warned_reset = i64::try_from(config.late_warned_reset_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| {
                BotError::config(format!(
                    "late_warned_reset_secs out of range: {}",
                    config.late_warned_reset_secs
                ))
            })?;
        let lookback = chrono::Duration::try_days(config.dedup_lookback_days).ok_or_else(|| {
            BotError::config(format!(
                "dedup_lookback_days out of range: {}",
                config.dedup_lookback_days
            ))
        })?;
        Ok(Self {
            fetch_timeout: Duration::from_secs(config.fetch_timeout_secs),
            late_warned_reset,
            updater_reminder_offset: config.updater_reminder_offset_secs,
            warn_past: config.warn_past_secs,
            warn_ahead: config.warn_ahead_secs,
            operator_warn: config.operator_warn_secs,
            lookback,
            none_needed: config.none_needed_sentinel.clone(),
            plan_offset,
        })
    }
}

/// Parse a plan row's time: RFC 3339, or `YYYY-MM-DD HH:MM` at `offset`.
pub fn parse_plan_time(raw: &str, offset: FixedOffset) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp());
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M").ok()?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.timestamp())
}

/// Normalize a List A row.
pub fn normalize_plan(row: &PlanRow, offset: FixedOffset) -> Result<ScheduledEvent> {
    let source_id = format!("plan:{}", row.row_id);
    if row.name.trim().is_empty() {
        return Err(BotError::malformed(source_id, "missing name"));
    }
    if row.creator.trim().is_empty() {
        return Err(BotError::malformed(source_id, "missing creator"));
    }
    let Some(trigger_time) = parse_plan_time(&row.when, offset) else {
        return Err(BotError::malformed(
            source_id,
            format!("unreadable time '{}'", row.when),
        ));
    };
    let updater = row
        .updater
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(String::from);
    Ok(ScheduledEvent {
        name: row.name.trim().to_string(),
        creator: row.creator.trim().to_string(),
        updater,
        trigger_time,
        source_id,
    })
}

/// Normalize a List B row. Only the id and the time are required; an
/// untitled post is named after its id.
pub fn normalize_scheduled(row: &ScheduledPostRow) -> Result<ScheduledEvent> {
    let source_id = format!("post:{}", row.id);
    if row.id.trim().is_empty() {
        return Err(BotError::malformed(source_id, "missing id"));
    }
    let trigger_time = match row.scheduled_at {
        Some(t) if t > 0 => t,
        _ => return Err(BotError::malformed(source_id, "missing scheduled time")),
    };
    let name = match row.title.trim() {
        "" => row.id.trim(),
        title => title,
    };
    Ok(ScheduledEvent {
        name: name.to_string(),
        creator: row.author.trim().to_string(),
        updater: None,
        trigger_time,
        source_id,
    })
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub confirmed: usize,
    pub direct_warnings: usize,
    pub operator_warnings: usize,
    pub malformed: usize,
}

pub struct TaskReconciler {
    plan: Arc<dyn PlanSource>,
    schedule: Arc<dyn ScheduleSource>,
    db: BotDb,
    reminders: ReminderScheduler,
    notify: QueueSender,
    announcements: Destination,
    operator: OperatorAlerts,
    settings: ReconcileSettings,
    malformed: HashSet<String>,
    confirmed: HashSet<String>,
    late_warned: HashSet<(String, i64)>,
    late_cleared_at: DateTime<Utc>,
}

impl TaskReconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        plan: Arc<dyn PlanSource>,
        schedule: Arc<dyn ScheduleSource>,
        db: BotDb,
        reminders: ReminderScheduler,
        notify: QueueSender,
        announcements: Destination,
        operator: OperatorAlerts,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            plan,
            schedule,
            db,
            reminders,
            notify,
            announcements,
            operator,
            settings,
            malformed: HashSet::new(),
            confirmed: HashSet::new(),
            late_warned: HashSet::new(),
            late_cleared_at: Utc::now(),
        }
    }

    /// Prune dedup records outside the lookback window, then load the rest.
    pub async fn load_dedup(&mut self) -> Result<()> {
        let since = Utc::now() - self.settings.lookback;
        let pruned = self.db.prune_dedup(since).await?;
        self.malformed = self.db.load_dedup(DedupKind::Malformed, since).await?;
        self.confirmed = self.db.load_dedup(DedupKind::Confirmed, since).await?;
        tracing::info!(
            "📋 Reconciler loaded {} confirmed / {} malformed records ({pruned} pruned)",
            self.confirmed.len(),
            self.malformed.len()
        );
        Ok(())
    }

    /// Fetch both lists concurrently. Either deadline missing fails the lot.
    pub async fn fetch_lists(&self) -> Result<(Vec<PlanRow>, Vec<ScheduledPostRow>)> {
        let wait = self.settings.fetch_timeout;
        let (plan, scheduled) = tokio::join!(
            tokio::time::timeout(wait, self.plan.fetch_plan()),
            tokio::time::timeout(wait, self.schedule.fetch_scheduled()),
        );
        let plan = plan.map_err(|_| BotError::DataFetchTimeout("editorial plan".into()))??;
        let scheduled =
            scheduled.map_err(|_| BotError::DataFetchTimeout("scheduled posts".into()))??;
        Ok((plan, scheduled))
    }

    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleReport> {
        if now - self.late_cleared_at >= self.settings.late_warned_reset {
            self.late_warned.clear();
            self.late_cleared_at = now;
        }

        let (plan_rows, post_rows) = self.fetch_lists().await?;
        let mut report = CycleReport::default();

        let mut plan = Vec::with_capacity(plan_rows.len());
        for row in &plan_rows {
            match normalize_plan(row, self.settings.plan_offset) {
                Ok(event) => plan.push(event),
                Err(e) => self.report_malformed(e, now, &mut report).await?,
            }
        }
        let mut posts = Vec::with_capacity(post_rows.len());
        for row in &post_rows {
            match normalize_scheduled(row) {
                Ok(event) => posts.push(event),
                Err(e) => self.report_malformed(e, now, &mut report).await?,
            }
        }

        for item in &plan {
            let matches: Vec<&ScheduledEvent> = posts
                .iter()
                .filter(|post| post.trigger_time == item.trigger_time)
                .collect();
            if matches.is_empty() {
                self.warn_unscheduled(item, now, &mut report);
                continue;
            }
            for post in matches {
                if !self.confirmed.contains(&post.source_id) {
                    self.confirm(item, post, now).await?;
                    report.confirmed += 1;
                }
            }
        }

        Ok(report)
    }

    async fn report_malformed(
        &mut self,
        error: BotError,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> Result<()> {
        let (source_id, reason) = match error {
            BotError::MalformedEvent { source_id, reason } => (source_id, reason),
            other => return Err(other),
        };
        if self.malformed.contains(&source_id) {
            return Ok(());
        }
        tracing::warn!("⚠️ Malformed schedule entry {source_id}: {reason}");
        self.operator
            .send(format!("⚠️ Unreadable schedule entry `{source_id}`: {reason}"));
        self.db
            .record_dedup(DedupKind::Malformed, &source_id, now)
            .await?;
        self.malformed.insert(source_id);
        report.malformed += 1;
        Ok(())
    }

    async fn confirm(
        &mut self,
        item: &ScheduledEvent,
        post: &ScheduledEvent,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.db
            .record_dedup(DedupKind::Confirmed, &post.source_id, now)
            .await?;
        self.confirmed.insert(post.source_id.clone());

        tracing::info!(
            "✅ '{}' by {} matched {} at {}",
            item.name,
            item.creator,
            post.source_id,
            item.trigger_time
        );
        self.push(
            format!(
                "✅ **{}** by {} is scheduled for {}",
                item.name,
                item.creator,
                format_time(item.trigger_time)
            ),
            self.announcements.clone(),
        );

        let Some(updater) = &item.updater else {
            return Ok(());
        };
        if updater.eq_ignore_ascii_case(&self.settings.none_needed) {
            return Ok(());
        }
        let post_id = post.source_id.trim_start_matches("post:");
        self.reminders
            .schedule(Remindme {
                id: format!("update-{post_id}"),
                requester: updater.clone(),
                message: format!("time to update **{}**", item.name),
                trigger_time: item.trigger_time + self.settings.updater_reminder_offset,
                destination: Destination::DirectMessage(updater.clone()),
            })
            .await?;
        Ok(())
    }

    fn warn_unscheduled(&mut self, item: &ScheduledEvent, now: DateTime<Utc>, report: &mut CycleReport) {
        let key = (item.creator.clone(), item.trigger_time);
        if self.late_warned.contains(&key) {
            return;
        }
        let remaining = item.trigger_time - now.timestamp();
        if remaining <= -self.settings.warn_past || remaining >= self.settings.warn_ahead {
            return;
        }

        let due = describe_remaining(remaining);
        tracing::warn!("⏳ '{}' by {} is {due} with no scheduled post", item.name, item.creator);
        self.push(
            format!(
                "⏳ **{}** is {due} but nothing is scheduled yet. Please schedule it.",
                item.name
            ),
            Destination::DirectMessage(item.creator.clone()),
        );
        report.direct_warnings += 1;

        if remaining < self.settings.operator_warn {
            self.operator.send(format!(
                "⏳ **{}** by {} is {due} and still unscheduled",
                item.name, item.creator
            ));
            report.operator_warnings += 1;
        }
        self.late_warned.insert(key);
    }

    fn push(&self, message: String, destination: Destination) {
        if let Err(e) = self
            .notify
            .push(Payload::Alert(Alert::new(message, destination)))
        {
            tracing::error!("❌ Reconciler notice dropped: {e}");
        }
    }
}

fn format_time(epoch: i64) -> String {
    DateTime::<Utc>::from_timestamp(epoch, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| epoch.to_string())
}

fn describe_remaining(remaining: i64) -> String {
    let minutes = remaining.abs() / 60;
    let span = if minutes >= 60 {
        format!("{}h{:02}m", minutes / 60, minutes % 60)
    } else {
        format!("{minutes}m")
    };
    if remaining >= 0 {
        format!("due in {span}")
    } else {
        format!("{span} overdue")
    }
}

#[async_trait]
impl PeriodicJob for TaskReconciler {
    fn name(&self) -> &str {
        "reconcile"
    }

    async fn run_once(&mut self) -> Result<JobStatus> {
        match self.run_cycle(Utc::now()).await {
            Ok(report) => {
                tracing::debug!("📋 Reconcile cycle: {report:?}");
                Ok(JobStatus::Continue)
            }
            Err(BotError::DataFetchTimeout(what)) => {
                tracing::warn!("⏱️ Fetching {what} timed out, cycle abandoned");
                Ok(JobStatus::Continue)
            }
            Err(e) => Err(e),
        }
    }
}
