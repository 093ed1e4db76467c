//! Health supervisor — watches heartbeats, thread liveness and crash counters.
//!
//! It only reports. Restarting a worker is an operator decision, so a failure
//! that keeps coming back stays visible instead of being papered over.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use commbot_core::config::HealthConfig;
use std::sync::Arc;

use crate::context::Switch;
use crate::failure::OperatorAlerts;
use crate::heartbeat::{CrashCounters, CrashKind, HeartbeatRegistry};

/// OS-level (or equivalent) check that a worker is still running.
pub trait LivenessProbe: Send + Sync {
    fn is_alive(&self) -> bool;
}

impl<F> LivenessProbe for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_alive(&self) -> bool {
        self()
    }
}

/// Supervisor lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Waiting out the startup latency.
    Idle,
    /// Ticking at a fixed interval.
    Running,
    /// Switched off; the loop has ended.
    Disabled,
}

#[derive(Debug, Clone)]
pub struct HealthTiming {
    pub startup_delay: Duration,
    pub interval: Duration,
    pub heartbeat_timeout: Duration,
    pub crash_threshold: u32,
}

impl HealthTiming {
    pub fn from_config(config: &HealthConfig, crash_threshold: u32) -> Self {
        Self {
            startup_delay: Duration::from_secs(config.startup_delay_secs),
            interval: Duration::from_secs(config.interval_secs),
            heartbeat_timeout: Duration::from_secs(config.heartbeat_timeout_secs),
            crash_threshold,
        }
    }
}

pub struct HealthSupervisor {
    heartbeats: Arc<HeartbeatRegistry>,
    crashes: Arc<CrashCounters>,
    operator: OperatorAlerts,
    timing: HealthTiming,
    marker_path: PathBuf,
    switch: Switch,
    state: SupervisorState,
    started_at: DateTime<Utc>,
    cooperative: Vec<String>,
    threads: Vec<(String, Box<dyn LivenessProbe>)>,
    escalated: HashSet<CrashKind>,
}

impl HealthSupervisor {
    pub fn new(
        heartbeats: Arc<HeartbeatRegistry>,
        crashes: Arc<CrashCounters>,
        operator: OperatorAlerts,
        timing: HealthTiming,
        marker_path: PathBuf,
        switch: Switch,
    ) -> Self {
        Self {
            heartbeats,
            crashes,
            operator,
            timing,
            marker_path,
            switch,
            state: SupervisorState::Idle,
            started_at: Utc::now(),
            cooperative: Vec::new(),
            threads: Vec::new(),
            escalated: HashSet::new(),
        }
    }

    /// Watch a cooperative worker's heartbeat.
    pub fn watch_cooperative(&mut self, name: impl Into<String>) {
        self.cooperative.push(name.into());
    }

    /// Watch a thread-style worker through its liveness probe.
    pub fn watch_thread(&mut self, name: impl Into<String>, probe: Box<dyn LivenessProbe>) {
        self.threads.push((name.into(), probe));
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Workers still under observation.
    pub fn watched(&self) -> Vec<&str> {
        self.cooperative
            .iter()
            .map(String::as_str)
            .chain(self.threads.iter().map(|(n, _)| n.as_str()))
            .collect()
    }

    fn checks_enabled(&self, kind: CrashKind) -> bool {
        !self.escalated.contains(&kind)
    }

    /// One inspection pass. Returns the alert messages it raised.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut raised = Vec::new();

        for kind in [CrashKind::Thread, CrashKind::Cooperative] {
            let count = self.crashes.count(kind);
            if count > self.timing.crash_threshold && self.escalated.insert(kind) {
                raised.push(format!(
                    "🚨 {kind} workers hit {count} crashes (limit {}); their checks are disabled until the bot is restarted",
                    self.timing.crash_threshold
                ));
            }
        }

        let mut worst = 0i64;

        if self.checks_enabled(CrashKind::Cooperative) {
            let timeout = self.timing.heartbeat_timeout.as_secs() as i64;
            let crash_count = self.crashes.count(CrashKind::Cooperative);
            let mut stale = Vec::new();
            for name in &self.cooperative {
                let last_seen = self.heartbeats.last_seen(name).unwrap_or(self.started_at);
                let staleness = (now - last_seen).num_seconds().max(0);
                worst = worst.max(staleness);
                if staleness > timeout {
                    raised.push(format!(
                        "⚠️ `{name}` has not reported in {staleness}s (cooperative crashes: {crash_count})"
                    ));
                    stale.push(name.clone());
                }
            }
            self.cooperative.retain(|n| !stale.contains(n));
        }

        if self.checks_enabled(CrashKind::Thread) {
            let crash_count = self.crashes.count(CrashKind::Thread);
            let heartbeats = &self.heartbeats;
            let started_at = self.started_at;
            self.threads.retain(|(name, probe)| {
                if let Some(seen) = heartbeats.last_seen(name) {
                    worst = worst.max((now - seen).num_seconds().max(0));
                } else {
                    worst = worst.max((now - started_at).num_seconds().max(0));
                }
                if probe.is_alive() {
                    true
                } else {
                    raised.push(format!(
                        "💀 `{name}` thread is no longer running (thread crashes: {crash_count})"
                    ));
                    false
                }
            });
        }

        for message in &raised {
            tracing::warn!("{message}");
            self.operator.send(message.clone());
        }

        self.write_marker(worst);
        raised
    }

    fn write_marker(&self, worst: i64) {
        if let Some(parent) = self.marker_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).ok();
            }
        }
        if let Err(e) = std::fs::write(&self.marker_path, format!("{worst}\n")) {
            tracing::warn!("⚠️ Failed to write heartbeat marker {}: {e}", self.marker_path.display());
        }
    }

    /// Idle for the startup delay, then tick until switched off.
    pub async fn run(mut self) -> SupervisorState {
        tracing::info!(
            "🩺 Health supervisor started (first check in {}s, then every {}s)",
            self.timing.startup_delay.as_secs(),
            self.timing.interval.as_secs()
        );
        tokio::time::sleep(self.timing.startup_delay).await;
        self.state = SupervisorState::Running;

        let mut interval = tokio::time::interval(self.timing.interval);
        loop {
            interval.tick().await;
            if !self.switch.is_enabled() {
                self.state = SupervisorState::Disabled;
                tracing::info!("⏹️ Health supervisor disabled");
                return self.state;
            }
            self.tick(Utc::now());
        }
    }
}
