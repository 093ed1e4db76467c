//! Envelope → chat message. Deliberately plain: richer presentation belongs to
//! the content renderer, not the bridge.

use commbot_core::types::{Embed, Envelope, FeedItem, ModLogItem, ModMailItem, Payload};

/// Discord-ish embed colors per payload kind.
const COLOR_SUBMISSION: u32 = 0x00AAFF;

/// A message ready for a sink.
#[derive(Debug, Clone, PartialEq)]
pub enum Rendered {
    Text(String),
    Embed(Embed),
}

impl Rendered {
    /// One-line form used for the delivery log.
    pub fn summary(&self) -> String {
        let full = match self {
            Rendered::Text(text) => text.clone(),
            Rendered::Embed(embed) => embed.title.clone(),
        };
        truncate(&full, 120)
    }
}

/// Render an envelope. `last_responder` annotates mod mail with who answered last.
pub fn render(envelope: &Envelope, last_responder: Option<&str>) -> Rendered {
    match &envelope.payload {
        Payload::Submission(item) => Rendered::Embed(submission_embed(item)),
        Payload::Comment(item) => Rendered::Text(comment_text(item)),
        Payload::ModMail(item) => Rendered::Text(modmail_text(item, last_responder)),
        Payload::ModLog(item) => Rendered::Text(modlog_text(item)),
        Payload::Alert(alert) => Rendered::Text(alert.message.clone()),
    }
}

fn submission_embed(item: &FeedItem) -> Embed {
    Embed {
        title: item.title.clone().unwrap_or_else(|| format!("Post {}", item.id)),
        description: truncate(&item.body, 300),
        url: (!item.permalink.is_empty()).then(|| item.permalink.clone()),
        color: COLOR_SUBMISSION,
        footer: Some(format!("u/{}", item.author)),
    }
}

fn comment_text(item: &FeedItem) -> String {
    format!("💬 u/{}: {} <{}>", item.author, truncate(&item.body, 200), item.permalink)
}

fn modmail_text(item: &ModMailItem, last_responder: Option<&str>) -> String {
    let mut text = format!(
        "📨 **{}** from u/{}: {}",
        item.subject,
        item.author,
        truncate(&item.body, 300)
    );
    if let Some(who) = last_responder {
        text.push_str(&format!("\n↩️ last answered by u/{who}"));
    }
    text
}

fn modlog_text(item: &ModLogItem) -> String {
    let mut text = format!("🛡️ u/{} → {}", item.moderator, item.action);
    if let Some(target) = &item.target_author {
        text.push_str(&format!(" on u/{target}"));
    }
    if let Some(details) = &item.details {
        text.push_str(&format!(" ({details})"));
    }
    text
}

/// Cut at a char boundary, appending an ellipsis when shortened.
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let cut: String = s.chars().take(max_chars).collect();
    format!("{cut}…")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use commbot_core::types::QueueName;

    fn envelope(payload: Payload) -> Envelope {
        Envelope {
            queue: QueueName::ModMail,
            payload,
            enqueued_at: Utc::now(),
        }
    }

    #[test]
    fn test_truncate_multibyte() {
        assert_eq!(truncate("héllo", 10), "héllo");
        assert_eq!(truncate("héllo wörld", 4), "héll…");
    }

    #[test]
    fn test_modmail_annotation() {
        let env = envelope(Payload::ModMail(ModMailItem {
            conversation_id: "c1".into(),
            message_id: "m2".into(),
            author: "bob".into(),
            subject: "ban appeal".into(),
            body: "sorry".into(),
            is_moderator: false,
            created_utc: 0,
        }));
        match render(&env, Some("carol")) {
            Rendered::Text(text) => {
                assert!(text.contains("ban appeal"));
                assert!(text.contains("last answered by u/carol"));
            }
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn test_submission_is_embed() {
        let env = envelope(Payload::Submission(FeedItem {
            id: "p1".into(),
            author: "alice".into(),
            title: None,
            body: "body".into(),
            permalink: String::new(),
            created_utc: 0,
        }));
        match render(&env, None) {
            Rendered::Embed(embed) => {
                assert_eq!(embed.title, "Post p1");
                assert_eq!(embed.url, None);
            }
            other => panic!("expected embed, got {other:?}"),
        }
    }
}
