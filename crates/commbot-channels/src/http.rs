//! Status and transport classification shared by the HTTP adapters.

use std::time::Duration;

use commbot_core::error::{BotError, Result};

pub(crate) fn client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("commbot/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| BotError::Http(format!("client build failed: {e}")))
}

/// Pass successful responses through; turn everything else into a [`BotError`]
/// that the worker failure policy understands.
pub(crate) async fn check(response: reqwest::Response, context: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if let Some(err) = BotError::from_status(status.as_u16(), context) {
        return Err(err);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BotError::Http(format!("{context}: {status}: {body}")))
}

/// Timeouts and refused connections are the upstream's problem, not ours.
pub(crate) fn transport(context: &str, e: reqwest::Error) -> BotError {
    if e.is_timeout() || e.is_connect() {
        BotError::TransientUpstream(format!("{context}: {e}"))
    } else {
        BotError::Http(format!("{context}: {e}"))
    }
}
