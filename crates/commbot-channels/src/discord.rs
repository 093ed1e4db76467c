//! Discord Bot channel — REST API only.
//!
//! Sends channel messages and embeds, opens DM channels for users listed in
//! the `[discord.users]` directory, and edits messages in place for
//! auto-updated content.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use commbot_core::config::DiscordConfig;
use commbot_core::error::{BotError, Result};
use commbot_core::traits::{NotificationSink, Publisher};
use commbot_core::types::{Destination, Embed};
use serde::Deserialize;

use crate::http;

const API_BASE: &str = "https://discord.com/api/v10";
/// Discord rejects message content above this many characters.
const MAX_CONTENT: usize = 2000;

#[derive(Debug, Deserialize)]
struct DiscordChannelRef {
    id: String,
}

/// Discord REST client implementing [`NotificationSink`] and [`Publisher`].
pub struct DiscordChannel {
    client: reqwest::Client,
    api_base: String,
    token: String,
    /// feed username → Discord user id
    users: HashMap<String, String>,
    /// Discord user id → DM channel id
    dm_channels: Mutex<HashMap<String, String>>,
}

impl DiscordChannel {
    pub fn new(config: &DiscordConfig) -> Result<Self> {
        if config.bot_token.is_empty() {
            return Err(BotError::config("discord.bot_token is empty"));
        }
        Ok(Self {
            client: http::client(Duration::from_secs(10))?,
            api_base: API_BASE.to_string(),
            token: config.bot_token.clone(),
            users: config.users.clone(),
            dm_channels: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn auth(&self) -> String {
        format!("Bot {}", self.token)
    }

    /// Resolve a destination to the channel id messages are posted to.
    async fn channel_for(&self, destination: &Destination) -> Result<String> {
        let user = match destination {
            Destination::Channel(id) => return Ok(id.clone()),
            Destination::DirectMessage(user) => user,
        };
        let user_id = self
            .users
            .get(user)
            .ok_or_else(|| BotError::channel(format!("no Discord user mapped for '{user}'")))?
            .clone();

        let cached = self
            .dm_channels
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&user_id)
            .cloned();
        if let Some(channel) = cached {
            return Ok(channel);
        }

        let context = "Discord open DM";
        let response = self
            .client
            .post(format!("{}/users/@me/channels", self.api_base))
            .header("Authorization", self.auth())
            .json(&serde_json::json!({ "recipient_id": user_id }))
            .send()
            .await
            .map_err(|e| http::transport(context, e))?;
        let channel: DiscordChannelRef = http::check(response, context)
            .await?
            .json()
            .await
            .map_err(|e| BotError::channel(format!("Invalid DM channel response: {e}")))?;

        tracing::debug!("💬 Opened Discord DM channel for {user}");
        self.dm_channels
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(user_id, channel.id.clone());
        Ok(channel.id)
    }

    async fn post(&self, destination: &Destination, body: serde_json::Value) -> Result<()> {
        let channel_id = self.channel_for(destination).await?;
        let context = "Discord send";
        let response = self
            .client
            .post(format!("{}/channels/{channel_id}/messages", self.api_base))
            .header("Authorization", self.auth())
            .json(&body)
            .send()
            .await
            .map_err(|e| http::transport(context, e))?;
        http::check(response, context).await?;
        Ok(())
    }
}

fn clip(content: &str) -> String {
    if content.chars().count() <= MAX_CONTENT {
        return content.to_string();
    }
    let mut out: String = content.chars().take(MAX_CONTENT - 1).collect();
    out.push('…');
    out
}

#[async_trait]
impl NotificationSink for DiscordChannel {
    fn name(&self) -> &str {
        "discord"
    }

    async fn send(&self, destination: &Destination, content: &str) -> Result<()> {
        self.post(destination, serde_json::json!({ "content": clip(content) }))
            .await
    }

    async fn send_embed(&self, destination: &Destination, embed: &Embed) -> Result<()> {
        let mut body = serde_json::json!({
            "title": embed.title,
            "description": embed.description,
            "color": embed.color,
        });
        if let Some(url) = &embed.url {
            body["url"] = serde_json::json!(url);
        }
        if let Some(footer) = &embed.footer {
            body["footer"] = serde_json::json!({ "text": footer });
        }
        self.post(destination, serde_json::json!({ "embeds": [body] }))
            .await
    }
}

#[async_trait]
impl Publisher for DiscordChannel {
    /// `destination_id` is `channel_id/message_id`; the message is edited in place.
    async fn publish(&self, destination_id: &str, content: &str) -> Result<()> {
        let Some((channel_id, message_id)) = destination_id.split_once('/') else {
            return Err(BotError::channel(format!(
                "expected channel/message, got '{destination_id}'"
            )));
        };
        let context = "Discord edit";
        let response = self
            .client
            .patch(format!(
                "{}/channels/{channel_id}/messages/{message_id}",
                self.api_base
            ))
            .header("Authorization", self.auth())
            .json(&serde_json::json!({ "content": clip(content) }))
            .send()
            .await
            .map_err(|e| http::transport(context, e))?;
        http::check(response, context).await?;
        tracing::debug!("✏️ Republished {destination_id}");
        Ok(())
    }
}
