//! Unified error types for Commbot.

use thiserror::Error;

/// Result type alias using BotError.
pub type Result<T> = std::result::Result<T, BotError>;

#[derive(Error, Debug)]
pub enum BotError {
    // Upstream signals
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Upstream unavailable: {0}")]
    TransientUpstream(String),

    #[error("Data fetch timed out: {0}")]
    DataFetchTimeout(String),

    #[error("Malformed event {source_id}: {reason}")]
    MalformedEvent { source_id: String, reason: String },

    // Collaborator errors
    #[error("Feed error: {0}")]
    Feed(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Queue closed: {0}")]
    QueueClosed(String),

    // Config errors
    #[error("Configuration error: {0}")]
    Config(String),

    // General errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("{0}")]
    Other(String),
}

/// How a worker's outer loop treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The upstream explicitly asked us to slow down. Long cooldown, never a crash.
    RateLimited,
    /// Service unavailable or similar. Short cooldown, never a crash.
    Transient,
    /// Everything else. Counted, logged, surfaced to operators.
    Unclassified,
}

impl BotError {
    pub fn feed(msg: impl Into<String>) -> Self {
        Self::Feed(msg.into())
    }

    pub fn channel(msg: impl Into<String>) -> Self {
        Self::Channel(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn malformed(source_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedEvent {
            source_id: source_id.into(),
            reason: reason.into(),
        }
    }

    /// Map this error onto the three-way worker classification.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::RateLimited(_) => FailureClass::RateLimited,
            Self::TransientUpstream(_) => FailureClass::Transient,
            _ => FailureClass::Unclassified,
        }
    }

    /// Classify an HTTP status returned by an upstream API.
    /// Returns `None` for statuses that are not failures of the upstream itself.
    pub fn from_status(status: u16, context: &str) -> Option<Self> {
        match status {
            429 => Some(Self::RateLimited(format!("{context}: HTTP 429"))),
            500 | 502 | 503 | 504 => {
                Some(Self::TransientUpstream(format!("{context}: HTTP {status}")))
            }
            _ => None,
        }
    }
}
