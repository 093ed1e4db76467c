//! Outer-boundary failure handling shared by every worker loop.
//!
//! Rate-limit and transient faults buy a cooldown and are never counted.
//! Anything else bumps the crash counter for the worker's style, is surfaced
//! to operators, and past the threshold ends the loop for good.

use std::time::Duration;

use commbot_core::config::WorkerConfig;
use commbot_core::error::{BotError, FailureClass};
use commbot_core::types::{Alert, Destination, Payload};

use crate::heartbeat::{CrashCounters, CrashKind};
use crate::queue::QueueSender;

/// Loop timing for source/sink/periodic workers.
#[derive(Debug, Clone)]
pub struct WorkerTiming {
    pub restart_interval: Duration,
    pub rate_limit_cooldown: Duration,
    pub transient_cooldown: Duration,
    pub sink_interval: Duration,
    /// Loops stop once the crash count exceeds this.
    pub crash_threshold: u32,
}

impl WorkerTiming {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            restart_interval: config.restart_interval(),
            rate_limit_cooldown: config.rate_limit_cooldown(),
            transient_cooldown: config.transient_cooldown(),
            sink_interval: config.sink_interval(),
            crash_threshold: config.crash_threshold,
        }
    }
}

impl Default for WorkerTiming {
    fn default() -> Self {
        Self::from_config(&WorkerConfig::default())
    }
}

/// What the loop should do after a failed pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Sleep this long, then carry on.
    Cooldown(Duration),
    /// Counted; carry on after the usual restart sleep.
    Crashed { count: u32 },
    /// Counted and over the threshold; stop the loop.
    Escalated { count: u32 },
}

/// Operator channel handle: alerts pushed here reach the humans on call.
#[derive(Debug, Clone)]
pub struct OperatorAlerts {
    alerts: QueueSender,
    destination: Destination,
}

impl OperatorAlerts {
    pub fn new(alerts: QueueSender, destination: Destination) -> Self {
        Self { alerts, destination }
    }

    /// Push an alert to the operator channel. Failures are logged, never raised.
    pub fn send(&self, message: impl Into<String>) {
        let alert = Alert::new(message, self.destination.clone());
        if let Err(e) = self.alerts.push(Payload::Alert(alert)) {
            tracing::error!("❌ Could not queue operator alert: {e}");
        }
    }
}

/// Classify `err` for `worker` and update the crash counter when it is unclassified.
pub fn handle_failure(
    worker: &str,
    err: &BotError,
    kind: CrashKind,
    crashes: &CrashCounters,
    operator: Option<&OperatorAlerts>,
    timing: &WorkerTiming,
) -> FailureOutcome {
    match err.failure_class() {
        FailureClass::RateLimited => {
            tracing::warn!(
                "⏳ [{worker}] rate limited, cooling down for {}s: {err}",
                timing.rate_limit_cooldown.as_secs()
            );
            FailureOutcome::Cooldown(timing.rate_limit_cooldown)
        }
        FailureClass::Transient => {
            tracing::debug!("🌧️ [{worker}] upstream unavailable: {err}");
            FailureOutcome::Cooldown(timing.transient_cooldown)
        }
        FailureClass::Unclassified => {
            let count = crashes.record(kind);
            tracing::error!(
                worker,
                crash_kind = %kind,
                crash_count = count,
                error = ?err,
                "💥 Worker failure: {err}"
            );
            if let Some(op) = operator {
                op.send(format!(
                    "💥 `{worker}` failed ({kind} crashes: {count}): {err}"
                ));
            }
            if count > timing.crash_threshold {
                tracing::error!("🛑 [{worker}] crash threshold exceeded, stopping loop");
                FailureOutcome::Escalated { count }
            } else {
                FailureOutcome::Crashed { count }
            }
        }
    }
}
