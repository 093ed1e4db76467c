//! HTTP JSON community-feed client.
//!
//! `GET {base_url}/{feed}?after={cursor}` returns `{"items": [...], "cursor": "..."}`;
//! the cursor is remembered per feed so each fetch only yields new items.
//! Mod mail is marked read with `POST {base_url}/modmail/read {"ids": [...]}`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use commbot_core::config::FeedConfig;
use commbot_core::error::{BotError, Result};
use commbot_core::traits::{FeedClient, FeedKind};
use commbot_core::types::{FeedItem, ModLogItem, ModMailItem, Payload};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::http;

#[derive(Debug, Deserialize)]
struct FeedPage<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(default)]
    cursor: Option<String>,
}

pub struct HttpFeedClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    cursors: HashMap<FeedKind, String>,
}

impl HttpFeedClient {
    pub fn new(config: &FeedConfig) -> Result<Self> {
        if config.base_url.is_empty() {
            return Err(BotError::config("feed.base_url is empty"));
        }
        Ok(Self {
            client: http::client(Duration::from_secs(config.request_timeout_secs))?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            cursors: HashMap::new(),
        })
    }

    pub fn cursor(&self, feed: FeedKind) -> Option<&str> {
        self.cursors.get(&feed).map(String::as_str)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.token.is_empty() {
            request
        } else {
            request.bearer_auth(&self.token)
        }
    }

    async fn page<T: DeserializeOwned>(&mut self, feed: FeedKind) -> Result<Vec<T>> {
        let context = format!("feed {feed}");
        let mut request = self
            .client
            .get(format!("{}/{}", self.base_url, feed.as_str()));
        if let Some(cursor) = self.cursors.get(&feed) {
            request = request.query(&[("after", cursor.as_str())]);
        }
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| http::transport(&context, e))?;
        let page: FeedPage<T> = http::check(response, &context)
            .await?
            .json()
            .await
            .map_err(|e| BotError::feed(format!("Invalid {context} response: {e}")))?;

        if let Some(cursor) = page.cursor {
            self.cursors.insert(feed, cursor);
        }
        Ok(page.items)
    }
}

#[async_trait]
impl FeedClient for HttpFeedClient {
    async fn fetch(&mut self, feed: FeedKind) -> Result<Vec<Payload>> {
        let payloads: Vec<Payload> = match feed {
            FeedKind::Submissions => self
                .page::<FeedItem>(feed)
                .await?
                .into_iter()
                .map(Payload::Submission)
                .collect(),
            FeedKind::Comments => self
                .page::<FeedItem>(feed)
                .await?
                .into_iter()
                .map(Payload::Comment)
                .collect(),
            FeedKind::ModMail => self
                .page::<ModMailItem>(feed)
                .await?
                .into_iter()
                .map(Payload::ModMail)
                .collect(),
            FeedKind::ModLog => self
                .page::<ModLogItem>(feed)
                .await?
                .into_iter()
                .map(Payload::ModLog)
                .collect(),
        };
        if !payloads.is_empty() {
            tracing::debug!("📥 {} new item(s) from {feed}", payloads.len());
        }
        Ok(payloads)
    }

    async fn mark_read(&mut self, feed: FeedKind, ids: &[String]) -> Result<()> {
        if feed != FeedKind::ModMail || ids.is_empty() {
            return Ok(());
        }
        let context = "feed modmail/read";
        let request = self
            .client
            .post(format!("{}/modmail/read", self.base_url))
            .json(&serde_json::json!({ "ids": ids }));
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| http::transport(context, e))?;
        http::check(response, context).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> HttpFeedClient {
        HttpFeedClient::new(&FeedConfig {
            base_url: format!("{}/", server.uri()),
            token: "tok".into(),
            request_timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_requires_base_url() {
        assert!(HttpFeedClient::new(&FeedConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_fetch_advances_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/submissions"))
            .and(query_param("after", "c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [],
                "cursor": "c1"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/submissions"))
            .and(header("Authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{
                    "id": "t3_a",
                    "author": "alice",
                    "title": "Hello",
                    "body": "first post",
                    "permalink": "/r/x/a",
                    "created_utc": 1700000000
                }],
                "cursor": "c1"
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        let mut feed = client(&server);
        let first = feed.fetch(FeedKind::Submissions).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(matches!(&first[0], Payload::Submission(item) if item.author == "alice"));
        assert_eq!(feed.cursor(FeedKind::Submissions), Some("c1"));

        let second = feed.fetch(FeedKind::Submissions).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_modmail_items_and_mark_read() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/modmail"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{
                    "conversation_id": "conv1",
                    "message_id": "m1",
                    "author": "bob",
                    "subject": "appeal",
                    "body": "please",
                    "is_moderator": false,
                    "created_utc": 1700000000
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/modmail/read"))
            .and(body_json(serde_json::json!({ "ids": ["conv1"] })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let mut feed = client(&server);
        let items = feed.fetch(FeedKind::ModMail).await.unwrap();
        assert!(matches!(&items[0], Payload::ModMail(m) if m.conversation_id == "conv1"));
        feed.mark_read(FeedKind::ModMail, &["conv1".to_string()])
            .await
            .unwrap();
        // Other feeds have nothing to mark.
        feed.mark_read(FeedKind::Comments, &["x".to_string()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rate_limit_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/modlog"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/comments"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let mut feed = client(&server);
        assert!(matches!(
            feed.fetch(FeedKind::ModLog).await.unwrap_err(),
            BotError::RateLimited(_)
        ));
        assert!(matches!(
            feed.fetch(FeedKind::Comments).await.unwrap_err(),
            BotError::TransientUpstream(_)
        ));
    }
}
