//! Generic HTTP JSON adapters for the editorial plan, the scheduled-post
//! list and the content renderer.

use std::time::Duration;

use async_trait::async_trait;
use commbot_core::error::{BotError, Result};
use commbot_core::traits::{ContentRenderer, PlanSource, ScheduleSource};
use commbot_core::types::{PlanRow, ScheduledPostRow};
use serde::de::DeserializeOwned;

use crate::http;

async fn get_json<T: DeserializeOwned>(client: &reqwest::Client, url: &str, context: &str) -> Result<T> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| http::transport(context, e))?;
    http::check(response, context)
        .await?
        .json()
        .await
        .map_err(|e| BotError::feed(format!("Invalid {context} response: {e}")))
}

/// List A over HTTP: the URL returns a JSON array of plan rows.
pub struct HttpPlanSource {
    client: reqwest::Client,
    url: String,
}

impl HttpPlanSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http::client(timeout)?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl PlanSource for HttpPlanSource {
    async fn fetch_plan(&self) -> Result<Vec<PlanRow>> {
        get_json(&self.client, &self.url, "editorial plan").await
    }
}

/// List B over HTTP: the URL returns a JSON array of scheduled-post rows.
pub struct HttpScheduleSource {
    client: reqwest::Client,
    url: String,
}

impl HttpScheduleSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http::client(timeout)?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ScheduleSource for HttpScheduleSource {
    async fn fetch_scheduled(&self) -> Result<Vec<ScheduledPostRow>> {
        get_json(&self.client, &self.url, "scheduled posts").await
    }
}

/// Renderer service: `GET {base}/render?source=..&template=..[&day=..]` returns plain text.
pub struct HttpRenderer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRenderer {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http::client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ContentRenderer for HttpRenderer {
    async fn render(&self, source_id: &str, template: &str, day_number: Option<u32>) -> Result<String> {
        let context = "renderer";
        let mut query = vec![("source", source_id.to_string()), ("template", template.to_string())];
        if let Some(day) = day_number {
            query.push(("day", day.to_string()));
        }
        let response = self
            .client
            .get(format!("{}/render", self.base_url))
            .query(&query)
            .send()
            .await
            .map_err(|e| http::transport(context, e))?;
        http::check(response, context)
            .await?
            .text()
            .await
            .map_err(|e| BotError::Render(format!("Unreadable render output: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_plan_rows_parse_with_defaults() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/plan"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "row_id": "1", "name": "Weekly", "creator": "carol", "when": "2026-01-05 18:00" },
                { "row_id": "2" }
            ])))
            .mount(&server)
            .await;

        let source = HttpPlanSource::new(format!("{}/plan", server.uri()), TIMEOUT).unwrap();
        let rows = source.fetch_plan().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].updater, None);
        assert_eq!(rows[1].name, "");
    }

    #[tokio::test]
    async fn test_scheduled_rows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/scheduled"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "id": "p1", "title": "Weekly", "author": "carol", "scheduled_at": 1767636000 }
            ])))
            .mount(&server)
            .await;

        let source = HttpScheduleSource::new(format!("{}/scheduled", server.uri()), TIMEOUT).unwrap();
        let rows = source.fetch_scheduled().await.unwrap();
        assert_eq!(rows[0].scheduled_at, Some(1_767_636_000));
    }

    #[tokio::test]
    async fn test_renderer_query_and_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/render"))
            .and(query_param("source", "league"))
            .and(query_param("template", "table-a=1"))
            .and(query_param("day", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_string("| team | pts |"))
            .mount(&server)
            .await;

        let renderer = HttpRenderer::new(&server.uri(), TIMEOUT).unwrap();
        let text = renderer.render("league", "table-a=1", Some(3)).await.unwrap();
        assert_eq!(text, "| team | pts |");

        // No matching mock → wiremock answers 404, which is not an upstream fault.
        let err = renderer.render("other", "table", None).await.unwrap_err();
        assert!(matches!(err, BotError::Http(_)));
    }
}
