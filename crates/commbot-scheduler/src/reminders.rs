//! One-shot reminders. Each live [`Remindme`] has exactly one armed timer task
//! and one durable row; both go away together on fire or cancel.
//!
//! The reminders switch is read on every schedule and every fire. While it is
//! off, new reminders are refused and due ones stay stored for the next reload.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use commbot_bridge::{QueueSender, Switch};
use commbot_core::error::Result;
use commbot_core::types::{Alert, Payload, Remindme};
use tokio::task::AbortHandle;

use crate::persistence::BotDb;

struct Armed {
    generation: u64,
    handle: AbortHandle,
}

struct Inner {
    db: BotDb,
    alerts: QueueSender,
    switch: Switch,
    armed: Mutex<HashMap<String, Armed>>,
    generation: AtomicU64,
}

/// Timer-backed reminder service. Cheap to clone; clones share timers.
#[derive(Clone)]
pub struct ReminderScheduler {
    inner: Arc<Inner>,
}

impl ReminderScheduler {
    pub fn new(db: BotDb, alerts: QueueSender) -> Self {
        Self::gated(db, alerts, Switch::new(true))
    }

    /// Like [`ReminderScheduler::new`], but scheduling and firing follow `switch`.
    pub fn gated(db: BotDb, alerts: QueueSender, switch: Switch) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                alerts,
                switch,
                armed: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Persist the reminder and arm its timer. Re-scheduling an existing id
    /// replaces the previous timer. Returns false when reminders are switched off.
    pub async fn schedule(&self, remindme: Remindme) -> Result<bool> {
        if !self.inner.switch.is_enabled() {
            tracing::info!("⏸️ Reminders disabled, '{}' not scheduled", remindme.id);
            return Ok(false);
        }
        self.inner.db.save_reminder(&remindme).await?;
        tracing::info!(
            "⏰ Reminder '{}' for {} at {}",
            remindme.id,
            remindme.requester,
            remindme.trigger_time
        );
        self.arm(remindme);
        Ok(true)
    }

    /// Stop the timer and delete the record. Returns false for unknown ids.
    pub async fn cancel(&self, id: &str) -> Result<bool> {
        let armed = self.lock().remove(id);
        if let Some(armed) = &armed {
            armed.handle.abort();
        }
        let existed = self.inner.db.delete_reminder(id).await?;
        if armed.is_none() && !existed {
            tracing::warn!("⚠️ Cancel for unknown reminder '{id}', nothing to do");
            return Ok(false);
        }
        tracing::info!("🗑️ Reminder '{id}' cancelled");
        Ok(true)
    }

    /// Re-arm every stored reminder. Elapsed ones fire promptly.
    pub async fn reload(&self) -> Result<usize> {
        let stored = self.inner.db.load_reminders().await?;
        let count = stored.len();
        for remindme in stored {
            self.arm(remindme);
        }
        if count > 0 {
            tracing::info!("⏰ Reloaded {count} pending reminder(s)");
        }
        Ok(count)
    }

    /// Pending reminders of one requester, soonest first.
    pub async fn list_for(&self, requester: &str) -> Result<Vec<Remindme>> {
        self.inner.db.reminders_for(requester).await
    }

    /// Number of armed timers.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Armed>> {
        self.inner.armed.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn arm(&self, remindme: Remindme) {
        let delay = (remindme.trigger_time - Utc::now().timestamp()).max(1) as u64;
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let id = remindme.id.clone();

        // Spawn under the lock so the task cannot fire before it is registered.
        let mut armed = self.lock();
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(delay)).await;
            fire(inner, remindme, generation).await;
        });
        if let Some(previous) = armed.insert(
            id,
            Armed {
                generation,
                handle: task.abort_handle(),
            },
        ) {
            previous.handle.abort();
        }
    }
}

async fn fire(inner: Arc<Inner>, remindme: Remindme, generation: u64) {
    // Claim our own handle first; a cancel or replacement that got there
    // earlier means this timer is stale.
    {
        let mut armed = inner.armed.lock().unwrap_or_else(|e| e.into_inner());
        if armed.get(&remindme.id).map(|a| a.generation) != Some(generation) {
            return;
        }
        armed.remove(&remindme.id);
    }

    if !inner.switch.is_enabled() {
        tracing::info!("⏸️ Reminders disabled, '{}' kept for the next reload", remindme.id);
        return;
    }

    let text = format!("⏰ Reminder for {}: {}", remindme.requester, remindme.message);
    if let Err(e) = inner
        .alerts
        .push(Payload::Alert(Alert::new(text, remindme.destination.clone())))
    {
        tracing::error!("❌ Reminder '{}' could not be queued: {e}", remindme.id);
    } else {
        tracing::info!("🔔 Reminder '{}' fired", remindme.id);
    }

    if let Err(e) = inner.db.delete_reminder(&remindme.id).await {
        tracing::error!("❌ Reminder '{}' fired but its record remains: {e}", remindme.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::tests::temp_db;
    use commbot_bridge::{QueueReceiver, QueueRegistry};
    use commbot_core::types::{Destination, QueueName};

    fn remindme(id: &str, in_secs: i64) -> Remindme {
        Remindme {
            id: id.into(),
            requester: "alice".into(),
            message: "check the thread".into(),
            trigger_time: Utc::now().timestamp() + in_secs,
            destination: Destination::DirectMessage("alice".into()),
        }
    }

    fn alerts() -> (QueueSender, QueueReceiver) {
        let queues = QueueRegistry::new();
        let tx = queues.sender(QueueName::Alerts);
        let rx = queues.take_receiver(QueueName::Alerts).unwrap();
        (tx, rx)
    }

    fn drain(rx: &mut QueueReceiver) -> Vec<Alert> {
        let mut out = Vec::new();
        while let Some(env) = rx.try_pop() {
            if let Payload::Alert(alert) = env.payload {
                out.push(alert);
            }
        }
        out
    }

    #[tokio::test]
    async fn test_fires_once_and_deletes_record() {
        let (_dir, db) = temp_db().await;
        let (tx, mut rx) = alerts();
        let reminders = ReminderScheduler::new(db.clone(), tx);

        assert!(reminders.schedule(remindme("r1", 1)).await.unwrap());
        assert_eq!(reminders.pending(), 1);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let fired = drain(&mut rx);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].message, "⏰ Reminder for alice: check the thread");
        assert_eq!(fired[0].destination, Destination::DirectMessage("alice".into()));
        assert_eq!(reminders.pending(), 0);
        assert!(db.load_reminders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_before_fire_delivers_nothing() {
        let (_dir, db) = temp_db().await;
        let (tx, mut rx) = alerts();
        let reminders = ReminderScheduler::new(db.clone(), tx);

        reminders.schedule(remindme("r1", 1)).await.unwrap();
        assert!(reminders.cancel("r1").await.unwrap());
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(drain(&mut rx).is_empty());
        assert_eq!(reminders.pending(), 0);
        assert!(db.load_reminders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_unknown_is_noop() {
        let (_dir, db) = temp_db().await;
        let (tx, _rx) = alerts();
        let reminders = ReminderScheduler::new(db, tx);
        assert!(!reminders.cancel("ghost").await.unwrap());
    }

    #[tokio::test]
    async fn test_reschedule_same_id_delivers_once() {
        let (_dir, db) = temp_db().await;
        let (tx, mut rx) = alerts();
        let reminders = ReminderScheduler::new(db, tx);

        reminders.schedule(remindme("r1", 1)).await.unwrap();
        reminders.schedule(remindme("r1", 1)).await.unwrap();
        assert_eq!(reminders.pending(), 1);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn test_reload_fires_elapsed_records() {
        let (_dir, db) = temp_db().await;
        db.save_reminder(&remindme("late", -600)).await.unwrap();
        db.save_reminder(&remindme("later", 3600)).await.unwrap();

        let (tx, mut rx) = alerts();
        let reminders = ReminderScheduler::new(db.clone(), tx);
        assert_eq!(reminders.reload().await.unwrap(), 2);
        assert_eq!(reminders.list_for("alice").await.unwrap().len(), 2);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(drain(&mut rx).len(), 1);
        assert_eq!(reminders.pending(), 1);
        let left = reminders.list_for("alice").await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, "later");
    }

    #[tokio::test]
    async fn test_switch_off_refuses_new_reminders() {
        let (_dir, db) = temp_db().await;
        let (tx, _rx) = alerts();
        let reminders = ReminderScheduler::gated(db.clone(), tx, Switch::new(false));

        assert!(!reminders.schedule(remindme("r1", 60)).await.unwrap());
        assert_eq!(reminders.pending(), 0);
        assert!(db.load_reminders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_switch_off_before_fire_keeps_record() {
        let (_dir, db) = temp_db().await;
        let (tx, mut rx) = alerts();
        let switch = Switch::new(true);
        let reminders = ReminderScheduler::gated(db.clone(), tx, switch.clone());

        assert!(reminders.schedule(remindme("r1", 1)).await.unwrap());
        switch.set(false);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(drain(&mut rx).is_empty());
        assert_eq!(reminders.pending(), 0);
        assert_eq!(db.load_reminders().await.unwrap().len(), 1);
    }
}
