//! Auto-update poller: re-renders each target, republishes only when the
//! rendered text changed since the last successful publish.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use commbot_bridge::failure::{FailureOutcome, OperatorAlerts, WorkerTiming, handle_failure};
use commbot_bridge::{CrashCounters, CrashKind};
use commbot_core::error::Result;
use commbot_core::traits::{ContentRenderer, Publisher};
use commbot_core::types::AutoUpdateTarget;

use crate::engine::{JobStatus, PeriodicJob};
use crate::persistence::BotDb;

const NAME: &str = "autoupdate";

/// Build the template string for a target.
///
/// Options are lower-cased, deduplicated, sorted and `-`-joined onto the kind.
/// An empty set, or one reducing to `none`, yields the bare kind.
pub fn compose_template(kind: &str, options: &str) -> String {
    let options: BTreeSet<String> = options
        .split(',')
        .map(|o| o.trim().to_lowercase())
        .filter(|o| !o.is_empty())
        .collect();
    if options.is_empty() || (options.len() == 1 && options.contains("none")) {
        return kind.to_string();
    }
    let joined: Vec<String> = options.into_iter().collect();
    format!("{kind}-{}", joined.join("-"))
}

/// Outcome of one pass over all targets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub published: usize,
    pub unchanged: usize,
    pub failed: usize,
    /// The crash threshold was crossed; the poller must stop.
    pub escalated: bool,
}

pub struct AutoUpdatePoller {
    db: BotDb,
    renderer: Arc<dyn ContentRenderer>,
    publisher: Arc<dyn Publisher>,
    crashes: Arc<CrashCounters>,
    operator: Option<OperatorAlerts>,
    timing: WorkerTiming,
    /// target id → last content published successfully
    cache: HashMap<String, String>,
}

impl AutoUpdatePoller {
    pub fn new(
        db: BotDb,
        renderer: Arc<dyn ContentRenderer>,
        publisher: Arc<dyn Publisher>,
        crashes: Arc<CrashCounters>,
        timing: WorkerTiming,
    ) -> Self {
        Self {
            db,
            renderer,
            publisher,
            crashes,
            operator: None,
            timing,
            cache: HashMap::new(),
        }
    }

    pub fn with_operator(mut self, operator: OperatorAlerts) -> Self {
        self.operator = Some(operator);
        self
    }

    pub async fn add_target(&mut self, target: &AutoUpdateTarget) -> Result<()> {
        self.db.upsert_target(target).await?;
        self.cache.remove(&target.id);
        tracing::info!("🔁 Auto-update target '{}' → {}", target.id, target.destination_id);
        Ok(())
    }

    pub async fn remove_target(&mut self, id: &str) -> Result<bool> {
        self.cache.remove(id);
        let removed = self.db.remove_target(id).await?;
        if !removed {
            tracing::warn!("⚠️ No auto-update target '{id}'");
        }
        Ok(removed)
    }

    pub async fn targets(&self) -> Result<Vec<AutoUpdateTarget>> {
        self.db.load_targets().await
    }

    pub fn cached(&self, id: &str) -> Option<&str> {
        self.cache.get(id).map(String::as_str)
    }

    async fn refresh(&mut self, target: &AutoUpdateTarget) -> Result<bool> {
        let template = compose_template(&target.template_kind, &target.template_options);
        let content = self
            .renderer
            .render(&target.source_id, &template, target.day_number)
            .await?;
        if self.cache.get(&target.id) == Some(&content) {
            return Ok(false);
        }
        self.publisher
            .publish(&target.destination_id, &content)
            .await?;
        self.cache.insert(target.id.clone(), content);
        Ok(true)
    }

    /// One pass over every durable target.
    pub async fn poll_once(&mut self) -> Result<PollReport> {
        let targets = self.db.load_targets().await?;
        self.cache
            .retain(|id, _| targets.iter().any(|t| &t.id == id));

        let mut report = PollReport::default();
        for target in &targets {
            match self.refresh(target).await {
                Ok(true) => {
                    tracing::info!("🔁 Republished '{}'", target.id);
                    report.published += 1;
                }
                Ok(false) => report.unchanged += 1,
                Err(e) => {
                    report.failed += 1;
                    let worker = format!("{NAME}:{}", target.id);
                    match handle_failure(
                        &worker,
                        &e,
                        CrashKind::Cooperative,
                        &self.crashes,
                        self.operator.as_ref(),
                        &self.timing,
                    ) {
                        // Upstream is pushing back; leave the rest for the next pass.
                        FailureOutcome::Cooldown(wait) => {
                            tokio::time::sleep(wait).await;
                            break;
                        }
                        FailureOutcome::Crashed { .. } => {}
                        FailureOutcome::Escalated { .. } => {
                            report.escalated = true;
                            break;
                        }
                    }
                }
            }
        }
        Ok(report)
    }
}

#[async_trait]
impl PeriodicJob for AutoUpdatePoller {
    fn name(&self) -> &str {
        NAME
    }

    async fn run_once(&mut self) -> Result<JobStatus> {
        let report = self.poll_once().await?;
        tracing::debug!("🔁 Auto-update pass: {report:?}");
        Ok(if report.escalated {
            JobStatus::Stop
        } else {
            JobStatus::Continue
        })
    }
}
