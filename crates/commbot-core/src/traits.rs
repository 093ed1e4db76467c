//! Collaborator traits — the seams between the core engine and the outside world.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Destination, Embed, Payload, PlanRow, ScheduledPostRow};

/// Which stream of the community feed a source worker follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedKind {
    Submissions,
    Comments,
    ModMail,
    ModLog,
}

impl FeedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::Submissions => "submissions",
            FeedKind::Comments => "comments",
            FeedKind::ModMail => "modmail",
            FeedKind::ModLog => "modlog",
        }
    }
}

impl std::fmt::Display for FeedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Community feed client. Implementations keep their own cursor so each
/// `fetch` only returns items not seen before.
#[async_trait]
pub trait FeedClient: Send {
    async fn fetch(&mut self, feed: FeedKind) -> Result<Vec<Payload>>;

    /// Mark items as read on the feed (only meaningful for mod mail).
    async fn mark_read(&mut self, feed: FeedKind, ids: &[String]) -> Result<()>;
}

/// Chat notification sink.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, destination: &Destination, content: &str) -> Result<()>;

    async fn send_embed(&self, destination: &Destination, embed: &Embed) -> Result<()>;
}

/// Republishes content in place (edit an existing message/page).
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, destination_id: &str, content: &str) -> Result<()>;
}

/// Turns a source id and a template string into presentable text.
#[async_trait]
pub trait ContentRenderer: Send + Sync {
    async fn render(&self, source_id: &str, template: &str, day_number: Option<u32>)
    -> Result<String>;
}

/// List A: the editorial plan.
#[async_trait]
pub trait PlanSource: Send + Sync {
    async fn fetch_plan(&self) -> Result<Vec<PlanRow>>;
}

/// List B: scheduled posts the platform has confirmed.
#[async_trait]
pub trait ScheduleSource: Send + Sync {
    async fn fetch_scheduled(&self) -> Result<Vec<ScheduledPostRow>>;
}

/// Append-only record of what was delivered where.
#[async_trait]
pub trait DeliveryLog: Send + Sync {
    async fn append(&self, kind: &str, line: &str) -> Result<()>;
}
