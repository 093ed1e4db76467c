//! Process-wide context, built once at startup and handed to each worker.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use commbot_core::config::BotConfig;

use crate::heartbeat::{CrashCounters, HeartbeatRegistry};
use crate::queue::QueueRegistry;

/// Independently switchable parts of the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    SubmissionFeed,
    CommentFeed,
    ModMailFeed,
    ModLogFeed,
    Sinks,
    Health,
    Reconcile,
    Reminders,
    AutoUpdate,
}

impl Subsystem {
    pub const ALL: [Subsystem; 9] = [
        Subsystem::SubmissionFeed,
        Subsystem::CommentFeed,
        Subsystem::ModMailFeed,
        Subsystem::ModLogFeed,
        Subsystem::Sinks,
        Subsystem::Health,
        Subsystem::Reconcile,
        Subsystem::Reminders,
        Subsystem::AutoUpdate,
    ];
}

/// A shared on/off flag. Loops check it once per outer iteration.
#[derive(Debug, Clone)]
pub struct Switch(Arc<AtomicBool>);

impl Switch {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Relaxed);
    }
}

/// One switch per subsystem.
#[derive(Debug, Clone)]
pub struct FeatureFlags {
    switches: HashMap<Subsystem, Switch>,
}

impl FeatureFlags {
    /// Everything on.
    pub fn all_enabled() -> Self {
        Self {
            switches: Subsystem::ALL
                .into_iter()
                .map(|s| (s, Switch::new(true)))
                .collect(),
        }
    }

    pub fn from_config(config: &BotConfig) -> Self {
        let flags = Self::all_enabled();
        let w = &config.workers;
        flags.switch(Subsystem::SubmissionFeed).set(w.submissions_enabled);
        flags.switch(Subsystem::CommentFeed).set(w.comments_enabled);
        flags.switch(Subsystem::ModMailFeed).set(w.modmail_enabled);
        flags.switch(Subsystem::ModLogFeed).set(w.modlog_enabled);
        flags.switch(Subsystem::Sinks).set(w.sinks_enabled);
        flags.switch(Subsystem::Health).set(config.health.enabled);
        flags.switch(Subsystem::Reconcile).set(config.reconcile.enabled);
        flags.switch(Subsystem::Reminders).set(config.reminders.enabled);
        flags.switch(Subsystem::AutoUpdate).set(config.autoupdate.enabled);
        flags
    }

    pub fn switch(&self, subsystem: Subsystem) -> Switch {
        // Every subsystem is populated in `all_enabled`.
        self.switches[&subsystem].clone()
    }

    pub fn is_enabled(&self, subsystem: Subsystem) -> bool {
        self.switches[&subsystem].is_enabled()
    }
}

/// Everything workers share across the thread and task models.
#[derive(Debug, Clone)]
pub struct BotContext {
    pub queues: Arc<QueueRegistry>,
    pub heartbeats: Arc<HeartbeatRegistry>,
    pub crashes: Arc<CrashCounters>,
    pub flags: FeatureFlags,
}

impl BotContext {
    pub fn new(flags: FeatureFlags) -> Self {
        Self {
            queues: Arc::new(QueueRegistry::new()),
            heartbeats: Arc::new(HeartbeatRegistry::new()),
            crashes: Arc::new(CrashCounters::new()),
            flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_from_config() {
        let mut cfg = BotConfig::default();
        cfg.workers.modlog_enabled = false;
        cfg.autoupdate.enabled = false;
        let flags = FeatureFlags::from_config(&cfg);
        assert!(!flags.is_enabled(Subsystem::ModLogFeed));
        assert!(!flags.is_enabled(Subsystem::AutoUpdate));
        assert!(flags.is_enabled(Subsystem::Sinks));
    }

    #[test]
    fn test_switch_is_shared() {
        let flags = FeatureFlags::all_enabled();
        let a = flags.switch(Subsystem::Sinks);
        let b = flags.switch(Subsystem::Sinks);
        a.set(false);
        assert!(!b.is_enabled());
        assert!(!flags.is_enabled(Subsystem::Sinks));
    }
}
