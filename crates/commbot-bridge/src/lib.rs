//! # Commbot Bridge
//!
//! Moves feed items into chat. Source workers poll the community feed on
//! dedicated threads and push envelopes onto named queues; sink workers drain
//! those queues cooperatively on the async runtime and hand the rendered
//! messages to a notification sink. A health supervisor watches both.
//!
//! ## Architecture
//! ```text
//! FeedClient ──► SourceWorker (thread) ──► [queue: submissions] ──► SinkWorker (task) ──► NotificationSink
//!                                      ──► [queue: modmail]     ──► SinkWorker (task) ──►
//!      every worker ──► HeartbeatRegistry / CrashCounters ◄── HealthSupervisor ──► [queue: alerts]
//! ```

pub mod context;
pub mod failure;
pub mod format;
pub mod health;
pub mod heartbeat;
pub mod queue;
pub mod sink;
pub mod source;

pub use context::{BotContext, FeatureFlags, Subsystem, Switch};
pub use failure::{FailureOutcome, OperatorAlerts, WorkerTiming, handle_failure};
pub use health::{HealthSupervisor, HealthTiming, LivenessProbe, SupervisorState};
pub use heartbeat::{CrashCounters, CrashKind, HeartbeatRegistry};
pub use queue::{QueueReceiver, QueueRegistry, QueueSender};
pub use sink::{RecentResponders, SinkRoutes, SinkWorker};
pub use source::{SourceWorker, ThreadWorkerHandle, WorkerExit};
