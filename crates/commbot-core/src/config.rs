//! Commbot configuration system.
//!
//! Every tunable lives here with a documented default; each subsystem carries an
//! `enabled` flag that seeds the runtime feature switches.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{BotError, Result};
use crate::types::AutoUpdateTarget;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub bot: BotSection,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub reminders: ReminderConfig,
    #[serde(default)]
    pub autoupdate: AutoUpdateConfig,
    #[serde(default)]
    pub channels: ChannelRoutes,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
}

impl BotConfig {
    /// Load config from the default path (~/.commbot/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            tracing::info!("📄 No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BotError::Config(format!("Failed to read config: {e}")))?;
        Self::parse(&content)
    }

    /// Parse config from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| BotError::Config(format!("Failed to parse config: {e}")))
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Commbot home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".commbot")
    }

    /// Data directory with `~` expanded.
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.bot.data_dir).to_string())
    }

    /// Database path with `~` expanded.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join(&self.bot.db_file)
    }

    /// Heartbeat marker path with `~` expanded.
    pub fn marker_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.health.marker_path).to_string())
    }
}

/// Process-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSection {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_db_file")]
    pub db_file: String,
}

fn default_data_dir() -> String { "~/.commbot".into() }
fn default_db_file() -> String { "commbot.db".into() }
fn bool_true() -> bool { true }

impl Default for BotSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            db_file: default_db_file(),
        }
    }
}

/// Source/sink worker loop timing and escalation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Sleep after every outer iteration before re-checking the enablement flag.
    #[serde(default = "default_restart_interval")]
    pub restart_interval_secs: u64,
    /// Cooldown when the upstream signals too-many-requests.
    #[serde(default = "default_rate_limit_cooldown")]
    pub rate_limit_cooldown_secs: u64,
    /// Cooldown on transient upstream faults.
    #[serde(default = "default_transient_cooldown")]
    pub transient_cooldown_secs: u64,
    /// Unclassified failures tolerated before a loop stops for good.
    #[serde(default = "default_crash_threshold")]
    pub crash_threshold: u32,
    /// Fixed sleep between sink drains.
    #[serde(default = "default_sink_interval")]
    pub sink_interval_secs: u64,
    #[serde(default = "bool_true")]
    pub submissions_enabled: bool,
    #[serde(default = "bool_true")]
    pub comments_enabled: bool,
    #[serde(default = "bool_true")]
    pub modmail_enabled: bool,
    #[serde(default = "bool_true")]
    pub modlog_enabled: bool,
    #[serde(default = "bool_true")]
    pub sinks_enabled: bool,
}

fn default_restart_interval() -> u64 { 5 }
fn default_rate_limit_cooldown() -> u64 { 660 }
fn default_transient_cooldown() -> u64 { 60 }
fn default_crash_threshold() -> u32 { 5 }
fn default_sink_interval() -> u64 { 2 }

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            restart_interval_secs: default_restart_interval(),
            rate_limit_cooldown_secs: default_rate_limit_cooldown(),
            transient_cooldown_secs: default_transient_cooldown(),
            crash_threshold: default_crash_threshold(),
            sink_interval_secs: default_sink_interval(),
            submissions_enabled: true,
            comments_enabled: true,
            modmail_enabled: true,
            modlog_enabled: true,
            sinks_enabled: true,
        }
    }
}

impl WorkerConfig {
    pub fn restart_interval(&self) -> Duration { Duration::from_secs(self.restart_interval_secs) }
    pub fn rate_limit_cooldown(&self) -> Duration { Duration::from_secs(self.rate_limit_cooldown_secs) }
    pub fn transient_cooldown(&self) -> Duration { Duration::from_secs(self.transient_cooldown_secs) }
    pub fn sink_interval(&self) -> Duration { Duration::from_secs(self.sink_interval_secs) }
}

/// Health supervisor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Idle period before the first tick, so workers can report in.
    #[serde(default = "default_startup_delay")]
    pub startup_delay_secs: u64,
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,
    /// Staleness after which a cooperative worker is reported.
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,
    /// Single-line file holding the worst observed staleness in seconds.
    #[serde(default = "default_marker_path")]
    pub marker_path: String,
}

fn default_startup_delay() -> u64 { 60 }
fn default_health_interval() -> u64 { 30 }
fn default_heartbeat_timeout() -> u64 { 300 }
fn default_marker_path() -> String { "~/.commbot/heartbeat".into() }

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            startup_delay_secs: default_startup_delay(),
            interval_secs: default_health_interval(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            marker_path: default_marker_path(),
        }
    }
}

/// Task reconciler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_reconcile_interval")]
    pub interval_secs: u64,
    /// Deadline for each of the two concurrent list fetches.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    /// How often the in-memory late-warned set is wiped.
    #[serde(default = "default_late_reset")]
    pub late_warned_reset_secs: u64,
    /// Updater reminder fires this long after the event.
    #[serde(default = "default_reminder_offset")]
    pub updater_reminder_offset_secs: i64,
    /// Unscheduled events this far in the past are still warned about.
    #[serde(default = "default_warn_past")]
    pub warn_past_secs: i64,
    /// Unscheduled events further out than this are left alone.
    #[serde(default = "default_warn_ahead")]
    pub warn_ahead_secs: i64,
    /// Inside this window the operator channel is warned as well.
    #[serde(default = "default_operator_warn")]
    pub operator_warn_secs: i64,
    /// Durable dedup records older than this are neither loaded nor kept.
    #[serde(default = "default_lookback_days")]
    pub dedup_lookback_days: i64,
    /// Updater value meaning "no reminder needed".
    #[serde(default = "default_none_needed")]
    pub none_needed_sentinel: String,
    /// Fixed UTC offset (hours) for plan rows written without a zone.
    #[serde(default)]
    pub plan_utc_offset_hours: i32,
    #[serde(default)]
    pub plan_url: String,
    #[serde(default)]
    pub schedule_url: String,
}

fn default_reconcile_interval() -> u64 { 600 }
fn default_fetch_timeout() -> u64 { 20 }
fn default_late_reset() -> u64 { 3 * 3600 }
fn default_reminder_offset() -> i64 { 3600 }
fn default_warn_past() -> i64 { 2 * 3600 }
fn default_warn_ahead() -> i64 { 8 * 3600 }
fn default_operator_warn() -> i64 { 4 * 3600 }
fn default_lookback_days() -> i64 { 30 }
fn default_none_needed() -> String { "none".into() }

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_reconcile_interval(),
            fetch_timeout_secs: default_fetch_timeout(),
            late_warned_reset_secs: default_late_reset(),
            updater_reminder_offset_secs: default_reminder_offset(),
            warn_past_secs: default_warn_past(),
            warn_ahead_secs: default_warn_ahead(),
            operator_warn_secs: default_operator_warn(),
            dedup_lookback_days: default_lookback_days(),
            none_needed_sentinel: default_none_needed(),
            plan_utc_offset_hours: 0,
            plan_url: String::new(),
            schedule_url: String::new(),
        }
    }
}

/// Reminder scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Auto-update poller settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoUpdateConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_autoupdate_interval")]
    pub interval_secs: u64,
    /// Renderer endpoint; the poller stays off when empty.
    #[serde(default)]
    pub renderer_url: String,
    /// Targets seeded into the store at startup.
    #[serde(default)]
    pub targets: Vec<AutoUpdateTarget>,
}

fn default_autoupdate_interval() -> u64 { 300 }

impl Default for AutoUpdateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_autoupdate_interval(),
            renderer_url: String::new(),
            targets: Vec::new(),
        }
    }
}

/// Chat channel ids for each kind of traffic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelRoutes {
    #[serde(default)]
    pub operator: String,
    #[serde(default)]
    pub announcements: String,
    #[serde(default)]
    pub submissions: String,
    #[serde(default)]
    pub comments: String,
    #[serde(default)]
    pub modmail: String,
    #[serde(default)]
    pub modlog: String,
}

/// Community feed endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_feed_timeout")]
    pub request_timeout_secs: u64,
}

fn default_feed_timeout() -> u64 { 30 }

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: String::new(),
            request_timeout_secs: default_feed_timeout(),
        }
    }
}

/// Discord bot credentials and the feed-username → Discord user id directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub users: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = BotConfig::default();
        assert_eq!(cfg.workers.rate_limit_cooldown_secs, 660);
        assert_eq!(cfg.workers.crash_threshold, 5);
        assert_eq!(cfg.health.interval_secs, 30);
        assert_eq!(cfg.reconcile.fetch_timeout_secs, 20);
        assert_eq!(cfg.reconcile.late_warned_reset_secs, 10_800);
        assert_eq!(cfg.reconcile.none_needed_sentinel, "none");
        assert!(cfg.reminders.enabled);
    }

    #[test]
    fn test_parse_partial() {
        let cfg = BotConfig::parse(
            r#"
            [workers]
            restart_interval_secs = 1
            modmail_enabled = false

            [channels]
            operator = "111"

            [[autoupdate.targets]]
            id = "standings"
            destination_id = "222/333"
            source_id = "league-9"
            template_kind = "table"
            template_options = "b=2,a=1"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.workers.restart_interval_secs, 1);
        assert!(!cfg.workers.modmail_enabled);
        assert!(cfg.workers.comments_enabled);
        assert_eq!(cfg.channels.operator, "111");
        assert_eq!(cfg.autoupdate.targets.len(), 1);
        assert_eq!(cfg.autoupdate.targets[0].day_number, None);
    }

    #[test]
    fn test_parse_error() {
        let err = BotConfig::parse("[workers\nbroken").unwrap_err();
        assert!(matches!(err, BotError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[health]\nheartbeat_timeout_secs = 90\n").unwrap();
        let cfg = BotConfig::load_from(&path).unwrap();
        assert_eq!(cfg.health.heartbeat_timeout_secs, 90);
    }
}
