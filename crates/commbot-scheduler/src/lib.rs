//! # Commbot Scheduler
//!
//! Time-driven jobs: one-shot reminders, schedule reconciliation and content
//! auto-republishing, all sharing one SQLite pool.
//!
//! ## Design Principles
//! - SQLite persistence: reminders and dedup records survive restarts
//! - Tokio timers only, nothing runs while idle
//! - Every periodic job goes through the same failure policy as the bridge workers
//!
//! ## Architecture
//! ```text
//! PeriodicRunner (tokio interval)
//!   ├── TaskReconciler: plan ⇄ scheduled posts → announce / warn / remind
//!   └── AutoUpdatePoller: render → diff → publish
//!
//! ReminderScheduler
//!   └── one timer task per Remindme → [queue: alerts]
//!
//! BotDb (sqlx SqlitePool)
//!   ├── reminders
//!   ├── dedup (malformed, confirmed)
//!   ├── autoupdate_targets
//!   └── delivery_log
//! ```

pub mod autoupdate;
pub mod engine;
pub mod persistence;
pub mod reconcile;
pub mod reminders;

pub use autoupdate::{AutoUpdatePoller, PollReport, compose_template};
pub use engine::{JobStatus, PeriodicJob, PeriodicRunner};
pub use persistence::{BotDb, DedupKind};
pub use reconcile::{CycleReport, ReconcileSettings, TaskReconciler};
pub use reminders::ReminderScheduler;
