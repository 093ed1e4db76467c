//! Envelopes on the named queues and the records the schedulers work with.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The named queues between feed workers and notification workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    Submissions,
    Comments,
    ModMail,
    ModLog,
    Alerts,
}

impl QueueName {
    pub const ALL: [QueueName; 5] = [
        QueueName::Submissions,
        QueueName::Comments,
        QueueName::ModMail,
        QueueName::ModLog,
        QueueName::Alerts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Submissions => "submissions",
            QueueName::Comments => "comments",
            QueueName::ModMail => "modmail",
            QueueName::ModLog => "modlog",
            QueueName::Alerts => "alerts",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a notification goes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Destination {
    /// A chat channel, by platform id.
    Channel(String),
    /// A direct message to a community member, by feed username.
    DirectMessage(String),
}

impl Destination {
    pub fn kind(&self) -> &'static str {
        match self {
            Destination::Channel(_) => "channel",
            Destination::DirectMessage(_) => "dm",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Destination::Channel(id) | Destination::DirectMessage(id) => id,
        }
    }

    /// Rebuild from the `(kind, id)` pair used by the durable store.
    pub fn from_parts(kind: &str, id: &str) -> Option<Self> {
        match kind {
            "channel" => Some(Destination::Channel(id.to_string())),
            "dm" => Some(Destination::DirectMessage(id.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// An alert tuple: message plus where to deliver it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub message: String,
    pub destination: Destination,
}

impl Alert {
    pub fn new(message: impl Into<String>, destination: Destination) -> Self {
        Self {
            message: message.into(),
            destination,
        }
    }
}

/// A post or comment pulled from the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: String,
    pub author: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub permalink: String,
    /// Creation time, UTC epoch seconds.
    pub created_utc: i64,
}

/// One message in a moderator mail conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModMailItem {
    pub conversation_id: String,
    pub message_id: String,
    pub author: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    /// Whether the author is part of the moderation team.
    #[serde(default)]
    pub is_moderator: bool,
    pub created_utc: i64,
}

/// A moderator action recorded in the moderation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModLogItem {
    pub id: String,
    pub moderator: String,
    pub action: String,
    #[serde(default)]
    pub target_author: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    pub created_utc: i64,
}

/// What an envelope carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Submission(FeedItem),
    Comment(FeedItem),
    ModMail(ModMailItem),
    ModLog(ModLogItem),
    Alert(Alert),
}

impl Payload {
    /// Feed identity of the payload, if it came from the feed.
    pub fn source_id(&self) -> Option<&str> {
        match self {
            Payload::Submission(item) | Payload::Comment(item) => Some(&item.id),
            Payload::ModMail(item) => Some(&item.message_id),
            Payload::ModLog(item) => Some(&item.id),
            Payload::Alert(_) => None,
        }
    }
}

/// A typed unit of data placed on a queue for asynchronous delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub queue: QueueName,
    pub payload: Payload,
    pub enqueued_at: DateTime<Utc>,
}

/// An event normalized from either schedule list. `trigger_time` is always UTC epoch seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub name: String,
    pub creator: String,
    pub updater: Option<String>,
    pub trigger_time: i64,
    pub source_id: String,
}

/// A raw editorial-plan row, as the plan source hands it over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRow {
    pub row_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub updater: Option<String>,
    /// Either RFC 3339 or `YYYY-MM-DD HH:MM` in the plan's local offset.
    #[serde(default)]
    pub when: String,
}

/// A raw scheduled-post action recorded by the external platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledPostRow {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    /// UTC epoch seconds; absent or non-positive means the row is malformed.
    #[serde(default)]
    pub scheduled_at: Option<i64>,
}

/// A delayed one-shot reminder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remindme {
    pub id: String,
    pub requester: String,
    pub message: String,
    /// UTC epoch seconds.
    pub trigger_time: i64,
    pub destination: Destination,
}

/// A piece of content that is periodically re-rendered and republished in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoUpdateTarget {
    pub id: String,
    /// Where the rendered content lives (platform-specific, e.g. `channel/message`).
    pub destination_id: String,
    pub source_id: String,
    pub template_kind: String,
    /// Freeform comma-separated option set, e.g. `"b=2,a=1"`.
    #[serde(default)]
    pub template_options: String,
    #[serde(default)]
    pub day_number: Option<u32>,
}

/// Rich message body for sinks that support it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub url: Option<String>,
    pub color: u32,
    pub footer: Option<String>,
}
