//! Fixed-interval loop the reconciler and the auto-update poller run under.
//! Uses tokio::interval, so it sleeps between passes and costs nothing while idle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use commbot_bridge::failure::{FailureOutcome, OperatorAlerts, WorkerTiming, handle_failure};
use commbot_bridge::{CrashCounters, CrashKind, HeartbeatRegistry, Switch, WorkerExit};
use commbot_core::error::Result;
use tokio::time::MissedTickBehavior;

/// Whether a job wants to keep going after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Continue,
    /// The job hit its own crash threshold and must not run again.
    Stop,
}

/// A unit of periodic work.
#[async_trait]
pub trait PeriodicJob: Send {
    fn name(&self) -> &str;

    async fn run_once(&mut self) -> Result<JobStatus>;
}

/// Drives a [`PeriodicJob`] at a fixed interval with the shared failure policy.
pub struct PeriodicRunner {
    interval: Duration,
    switch: Switch,
    heartbeats: Arc<HeartbeatRegistry>,
    crashes: Arc<CrashCounters>,
    operator: Option<OperatorAlerts>,
    timing: WorkerTiming,
}

impl PeriodicRunner {
    pub fn new(
        interval: Duration,
        switch: Switch,
        heartbeats: Arc<HeartbeatRegistry>,
        crashes: Arc<CrashCounters>,
        timing: WorkerTiming,
    ) -> Self {
        Self {
            interval,
            switch,
            heartbeats,
            crashes,
            operator: None,
            timing,
        }
    }

    pub fn with_operator(mut self, operator: OperatorAlerts) -> Self {
        self.operator = Some(operator);
        self
    }

    /// Run `job` until switched off or escalated. The first pass is immediate.
    pub async fn run<J: PeriodicJob>(self, mut job: J) -> WorkerExit {
        let name = job.name().to_string();
        tracing::info!("⏰ [{name}] started (every {}s)", self.interval.as_secs());

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if !self.switch.is_enabled() {
                tracing::info!("⏹️ [{name}] disabled, exiting");
                return WorkerExit::Disabled;
            }

            match job.run_once().await {
                Ok(JobStatus::Continue) => self.heartbeats.beat(&name),
                Ok(JobStatus::Stop) => return WorkerExit::Escalated,
                Err(e) => match handle_failure(
                    &name,
                    &e,
                    CrashKind::Cooperative,
                    &self.crashes,
                    self.operator.as_ref(),
                    &self.timing,
                ) {
                    FailureOutcome::Cooldown(wait) => tokio::time::sleep(wait).await,
                    FailureOutcome::Crashed { .. } => {}
                    FailureOutcome::Escalated { .. } => return WorkerExit::Escalated,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commbot_core::error::BotError;

    struct CountingJob {
        runs: Arc<std::sync::atomic::AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl PeriodicJob for CountingJob {
        fn name(&self) -> &str {
            "counting"
        }

        async fn run_once(&mut self) -> Result<JobStatus> {
            self.runs.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if self.fail {
                Err(BotError::Other("nope".into()))
            } else {
                Ok(JobStatus::Continue)
            }
        }
    }

    fn timing() -> WorkerTiming {
        WorkerTiming {
            restart_interval: Duration::from_millis(1),
            rate_limit_cooldown: Duration::from_millis(1),
            transient_cooldown: Duration::from_millis(1),
            sink_interval: Duration::from_millis(1),
            crash_threshold: 5,
        }
    }

    #[tokio::test]
    async fn test_runs_until_disabled() {
        let switch = Switch::new(true);
        let heartbeats = Arc::new(HeartbeatRegistry::new());
        let runs = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let runner = PeriodicRunner::new(
            Duration::from_millis(5),
            switch.clone(),
            heartbeats.clone(),
            Arc::default(),
            timing(),
        );
        let task = tokio::spawn(runner.run(CountingJob {
            runs: runs.clone(),
            fail: false,
        }));
        tokio::time::sleep(Duration::from_millis(40)).await;
        switch.set(false);
        assert_eq!(task.await.unwrap(), WorkerExit::Disabled);
        assert!(runs.load(std::sync::atomic::Ordering::SeqCst) >= 2);
        assert!(heartbeats.last_seen("counting").is_some());
    }

    #[tokio::test]
    async fn test_failing_job_escalates() {
        let crashes = Arc::new(CrashCounters::new());
        let runs = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let runner = PeriodicRunner::new(
            Duration::from_millis(1),
            Switch::new(true),
            Arc::default(),
            crashes.clone(),
            timing(),
        );
        let exit = runner
            .run(CountingJob {
                runs: runs.clone(),
                fail: true,
            })
            .await;
        assert_eq!(exit, WorkerExit::Escalated);
        assert_eq!(runs.load(std::sync::atomic::Ordering::SeqCst), 6);
        assert_eq!(crashes.count(CrashKind::Cooperative), 6);
    }
}
