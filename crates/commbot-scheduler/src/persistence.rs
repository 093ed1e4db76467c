//! SQLite-backed persistence for reminders, dedup records, auto-update targets
//! and the delivery log. One pool is opened at startup and cloned into every
//! component; each statement borrows a connection for its own duration.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use commbot_core::error::{BotError, Result};
use commbot_core::traits::DeliveryLog;
use commbot_core::types::{AutoUpdateTarget, Destination, Remindme};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

const SCHEMA: &[&str] = &[
    // One-shot reminders; a row lives exactly as long as its timer.
    "CREATE TABLE IF NOT EXISTS reminders (
        id TEXT PRIMARY KEY,
        requester TEXT NOT NULL,
        message TEXT NOT NULL,
        trigger_time INTEGER NOT NULL,
        dest_kind TEXT NOT NULL,
        dest_id TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )",
    // Durable dedup sets: 'malformed' and 'confirmed'.
    "CREATE TABLE IF NOT EXISTS dedup (
        kind TEXT NOT NULL,
        source_id TEXT NOT NULL,
        recorded_at INTEGER NOT NULL,
        PRIMARY KEY (kind, source_id)
    )",
    "CREATE TABLE IF NOT EXISTS autoupdate_targets (
        id TEXT PRIMARY KEY,
        destination_id TEXT NOT NULL,
        source_id TEXT NOT NULL,
        template_kind TEXT NOT NULL,
        template_options TEXT NOT NULL DEFAULT '',
        day_number INTEGER
    )",
    // Append-only
    "CREATE TABLE IF NOT EXISTS delivery_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        kind TEXT NOT NULL,
        line TEXT NOT NULL,
        recorded_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_reminders_requester ON reminders (requester, trigger_time)",
];

/// Which durable dedup set a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupKind {
    /// Rows already reported as unreadable.
    Malformed,
    /// Plan/post matches already announced.
    Confirmed,
}

impl DedupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DedupKind::Malformed => "malformed",
            DedupKind::Confirmed => "confirmed",
        }
    }
}

fn db_err(context: &'static str) -> impl Fn(sqlx::Error) -> BotError {
    move |e| BotError::Store(format!("{context}: {e}"))
}

type ReminderRow = (String, String, String, i64, String, String);
type TargetRow = (String, String, String, String, String, Option<i64>);

fn reminder_from_row(row: ReminderRow) -> Option<Remindme> {
    let (id, requester, message, trigger_time, kind, dest_id) = row;
    let Some(destination) = Destination::from_parts(&kind, &dest_id) else {
        tracing::warn!("⚠️ Reminder {id} has unknown destination kind '{kind}', skipping");
        return None;
    };
    Some(Remindme {
        id,
        requester,
        message,
        trigger_time,
        destination,
    })
}

/// Pooled handle to the bot database. Cheap to clone.
#[derive(Debug, Clone)]
pub struct BotDb {
    pool: SqlitePool,
}

impl BotDb {
    /// Open or create the database and run migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(db_err("DB open"))?;
        let db = Self { pool };
        db.migrate().await?;
        tracing::debug!("💾 Database ready at {}", path.display());
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_err("Migration"))?;
        }
        Ok(())
    }

    // ─── Reminders ──────────────────────────────────────────

    pub async fn save_reminder(&self, remindme: &Remindme) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO reminders
             (id, requester, message, trigger_time, dest_kind, dest_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&remindme.id)
        .bind(&remindme.requester)
        .bind(&remindme.message)
        .bind(remindme.trigger_time)
        .bind(remindme.destination.kind())
        .bind(remindme.destination.id())
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(db_err("Save reminder"))?;
        Ok(())
    }

    /// Delete a reminder. Returns whether a row existed.
    pub async fn delete_reminder(&self, id: &str) -> Result<bool> {
        let done = sqlx::query("DELETE FROM reminders WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err("Delete reminder"))?;
        Ok(done.rows_affected() > 0)
    }

    /// Every stored reminder, soonest first.
    pub async fn load_reminders(&self) -> Result<Vec<Remindme>> {
        let rows: Vec<ReminderRow> = sqlx::query_as(
            "SELECT id, requester, message, trigger_time, dest_kind, dest_id
             FROM reminders ORDER BY trigger_time",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Load reminders"))?;
        Ok(rows.into_iter().filter_map(reminder_from_row).collect())
    }

    pub async fn reminders_for(&self, requester: &str) -> Result<Vec<Remindme>> {
        let rows: Vec<ReminderRow> = sqlx::query_as(
            "SELECT id, requester, message, trigger_time, dest_kind, dest_id
             FROM reminders WHERE requester = ?1 ORDER BY trigger_time",
        )
        .bind(requester)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Load reminders"))?;
        Ok(rows.into_iter().filter_map(reminder_from_row).collect())
    }

    // ─── Dedup sets ─────────────────────────────────────────

    pub async fn record_dedup(&self, kind: DedupKind, source_id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO dedup (kind, source_id, recorded_at) VALUES (?1, ?2, ?3)",
        )
        .bind(kind.as_str())
        .bind(source_id)
        .bind(at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(db_err("Record dedup"))?;
        Ok(())
    }

    /// Ids of one dedup set recorded at or after `since`.
    pub async fn load_dedup(&self, kind: DedupKind, since: DateTime<Utc>) -> Result<HashSet<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT source_id FROM dedup WHERE kind = ?1 AND recorded_at >= ?2",
        )
        .bind(kind.as_str())
        .bind(since.timestamp())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Load dedup"))?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Drop dedup records older than `before`. Returns how many went.
    pub async fn prune_dedup(&self, before: DateTime<Utc>) -> Result<u64> {
        let done = sqlx::query("DELETE FROM dedup WHERE recorded_at < ?1")
            .bind(before.timestamp())
            .execute(&self.pool)
            .await
            .map_err(db_err("Prune dedup"))?;
        Ok(done.rows_affected())
    }

    // ─── Auto-update targets ────────────────────────────────

    pub async fn upsert_target(&self, target: &AutoUpdateTarget) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO autoupdate_targets
             (id, destination_id, source_id, template_kind, template_options, day_number)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&target.id)
        .bind(&target.destination_id)
        .bind(&target.source_id)
        .bind(&target.template_kind)
        .bind(&target.template_options)
        .bind(target.day_number.map(i64::from))
        .execute(&self.pool)
        .await
        .map_err(db_err("Save target"))?;
        Ok(())
    }

    pub async fn remove_target(&self, id: &str) -> Result<bool> {
        let done = sqlx::query("DELETE FROM autoupdate_targets WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err("Delete target"))?;
        Ok(done.rows_affected() > 0)
    }

    pub async fn load_targets(&self) -> Result<Vec<AutoUpdateTarget>> {
        let rows: Vec<TargetRow> = sqlx::query_as(
            "SELECT id, destination_id, source_id, template_kind, template_options, day_number
             FROM autoupdate_targets ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Load targets"))?;
        Ok(rows
            .into_iter()
            .map(
                |(id, destination_id, source_id, template_kind, template_options, day)| {
                    AutoUpdateTarget {
                        id,
                        destination_id,
                        source_id,
                        template_kind,
                        template_options,
                        day_number: day.and_then(|d| u32::try_from(d).ok()),
                    }
                },
            )
            .collect())
    }

    // ─── Delivery log ───────────────────────────────────────

    pub async fn append_log(&self, kind: &str, line: &str) -> Result<()> {
        sqlx::query("INSERT INTO delivery_log (kind, line, recorded_at) VALUES (?1, ?2, ?3)")
            .bind(kind)
            .bind(line)
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await
            .map_err(db_err("Append log"))?;
        Ok(())
    }

    /// Most recent log lines, newest first.
    pub async fn recent_log(&self, limit: i64) -> Result<Vec<(String, String)>> {
        sqlx::query_as("SELECT kind, line FROM delivery_log ORDER BY id DESC LIMIT ?1")
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("Read log"))
    }
}

#[async_trait]
impl DeliveryLog for BotDb {
    async fn append(&self, kind: &str, line: &str) -> Result<()> {
        self.append_log(kind, line).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) async fn temp_db() -> (tempfile::TempDir, BotDb) {
        let dir = tempfile::tempdir().unwrap();
        let db = BotDb::open(&dir.path().join("test.db")).await.unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn test_open_and_migrate_twice() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("bot.db");
        let db = BotDb::open(&path).await.unwrap();
        assert!(db.load_reminders().await.unwrap().is_empty());
        drop(db);
        let db = BotDb::open(&path).await.unwrap();
        assert!(db.load_targets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reminder_lifecycle() {
        let (_dir, db) = temp_db().await;
        let r = Remindme {
            id: "r1".into(),
            requester: "alice".into(),
            message: "water the plants".into(),
            trigger_time: 2_000,
            destination: Destination::DirectMessage("alice".into()),
        };
        db.save_reminder(&r).await.unwrap();
        db.save_reminder(&Remindme {
            id: "r0".into(),
            trigger_time: 1_000,
            ..r.clone()
        })
        .await
        .unwrap();

        let all = db.load_reminders().await.unwrap();
        assert_eq!(all.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["r0", "r1"]);
        assert_eq!(all[1], r);
        assert_eq!(db.reminders_for("alice").await.unwrap().len(), 2);
        assert!(db.reminders_for("bob").await.unwrap().is_empty());

        assert!(db.delete_reminder("r1").await.unwrap());
        assert!(!db.delete_reminder("r1").await.unwrap());
    }

    #[tokio::test]
    async fn test_dedup_window_and_prune() {
        let (_dir, db) = temp_db().await;
        let now = Utc::now();
        let old = now - chrono::Duration::days(40);
        db.record_dedup(DedupKind::Confirmed, "old", old).await.unwrap();
        db.record_dedup(DedupKind::Confirmed, "new", now).await.unwrap();
        db.record_dedup(DedupKind::Malformed, "bad", now).await.unwrap();
        // Re-recording is a no-op.
        db.record_dedup(DedupKind::Confirmed, "new", now).await.unwrap();

        let cutoff = now - chrono::Duration::days(30);
        let confirmed = db.load_dedup(DedupKind::Confirmed, cutoff).await.unwrap();
        assert_eq!(confirmed, HashSet::from(["new".to_string()]));

        assert_eq!(db.prune_dedup(cutoff).await.unwrap(), 1);
        let malformed = db.load_dedup(DedupKind::Malformed, cutoff).await.unwrap();
        assert!(malformed.contains("bad"));
    }

    #[tokio::test]
    async fn test_targets_and_log() {
        let (_dir, db) = temp_db().await;
        let target = AutoUpdateTarget {
            id: "standings".into(),
            destination_id: "chan/msg".into(),
            source_id: "league".into(),
            template_kind: "table".into(),
            template_options: "a=1".into(),
            day_number: Some(3),
        };
        db.upsert_target(&target).await.unwrap();
        assert_eq!(db.load_targets().await.unwrap(), vec![target]);
        assert!(db.remove_target("standings").await.unwrap());
        assert!(db.load_targets().await.unwrap().is_empty());

        DeliveryLog::append(&db, "alerts", "first").await.unwrap();
        db.append_log("alerts", "second").await.unwrap();
        let log = db.recent_log(10).await.unwrap();
        assert_eq!(log[0].1, "second");
        assert_eq!(log.len(), 2);
    }
}
