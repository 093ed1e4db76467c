//! Source workers — one per feed, each on its own OS thread.
//!
//! The thread drives a single-threaded runtime so the feed client can stay
//! async, while a slow or wedged upstream only ever blocks its own thread.

use std::thread::JoinHandle;

use commbot_core::error::Result;
use commbot_core::traits::{FeedClient, FeedKind};
use commbot_core::types::Payload;

use crate::context::Switch;
use crate::failure::{FailureOutcome, OperatorAlerts, WorkerTiming, handle_failure};
use crate::health::LivenessProbe;
use crate::heartbeat::{CrashCounters, CrashKind, HeartbeatRegistry};
use crate::queue::QueueSender;
use std::sync::Arc;

/// Why a worker loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The enablement flag was switched off.
    Disabled,
    /// The crash counter passed the threshold.
    Escalated,
    /// The runtime for the worker could not be built.
    Failed,
}

/// A feed-polling loop that pushes everything it reads onto one queue.
pub struct SourceWorker {
    name: String,
    feed: FeedKind,
    client: Box<dyn FeedClient>,
    queue: QueueSender,
    heartbeats: Arc<HeartbeatRegistry>,
    crashes: Arc<CrashCounters>,
    operator: Option<OperatorAlerts>,
    switch: Switch,
    timing: WorkerTiming,
}

impl SourceWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        feed: FeedKind,
        client: Box<dyn FeedClient>,
        queue: QueueSender,
        heartbeats: Arc<HeartbeatRegistry>,
        crashes: Arc<CrashCounters>,
        operator: Option<OperatorAlerts>,
        switch: Switch,
        timing: WorkerTiming,
    ) -> Self {
        Self {
            name: format!("source:{feed}"),
            feed,
            client,
            queue,
            heartbeats,
            crashes,
            operator,
            switch,
            timing,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// One pass: fetch, push, mark read. Returns how many items were queued.
    async fn poll_once(&mut self) -> Result<usize> {
        let items = self.client.fetch(self.feed).await?;
        let count = items.len();
        let mut read_ids = Vec::new();
        for payload in items {
            if let Payload::ModMail(item) = &payload {
                read_ids.push(item.conversation_id.clone());
            }
            self.queue.push(payload)?;
        }
        if !read_ids.is_empty() {
            read_ids.sort_unstable();
            read_ids.dedup();
            self.client.mark_read(self.feed, &read_ids).await?;
        }
        if count > 0 {
            tracing::debug!("📥 [{}] queued {count} item(s) on {}", self.name, self.queue.name());
        }
        Ok(count)
    }

    /// Run until disabled or escalated. Never returns an error.
    pub async fn run(mut self) -> WorkerExit {
        tracing::info!("📡 [{}] started → queue '{}'", self.name, self.queue.name());
        loop {
            if !self.switch.is_enabled() {
                tracing::info!("⏹️ [{}] disabled, exiting", self.name);
                return WorkerExit::Disabled;
            }

            match self.poll_once().await {
                Ok(_) => self.heartbeats.beat(&self.name),
                Err(e) => match handle_failure(
                    &self.name,
                    &e,
                    CrashKind::Thread,
                    &self.crashes,
                    self.operator.as_ref(),
                    &self.timing,
                ) {
                    FailureOutcome::Cooldown(wait) => tokio::time::sleep(wait).await,
                    FailureOutcome::Crashed { .. } => {}
                    FailureOutcome::Escalated { .. } => return WorkerExit::Escalated,
                },
            }

            tokio::time::sleep(self.timing.restart_interval).await;
        }
    }

    /// Move the worker onto a dedicated, named OS thread.
    pub fn spawn(self) -> std::io::Result<ThreadWorkerHandle> {
        let name = self.name.clone();
        let join = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        tracing::error!("❌ [{}] could not build runtime: {e}", self.name);
                        return WorkerExit::Failed;
                    }
                };
                runtime.block_on(self.run())
            })?;
        Ok(ThreadWorkerHandle { name, join })
    }
}

/// Handle to a running source thread; doubles as its liveness probe.
#[derive(Debug)]
pub struct ThreadWorkerHandle {
    name: String,
    join: JoinHandle<WorkerExit>,
}

impl ThreadWorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the thread to finish.
    pub fn join(self) -> Option<WorkerExit> {
        self.join.join().ok()
    }
}

impl LivenessProbe for ThreadWorkerHandle {
    fn is_alive(&self) -> bool {
        !self.join.is_finished()
    }
}
