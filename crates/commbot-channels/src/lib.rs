//! # Commbot Channels
//! HTTP adapters behind the collaborator traits in `commbot-core`:
//! - [`DiscordChannel`]: notification sink and in-place publisher
//! - [`HttpFeedClient`]: cursor-paged community feed
//! - [`HttpPlanSource`] / [`HttpScheduleSource`] / [`HttpRenderer`]: plain JSON/text endpoints
//!
//! Every adapter maps HTTP 429 to `RateLimited` and 5xx to `TransientUpstream`
//! so the worker failure policy can tell upstream pressure from real faults.

pub mod discord;
pub mod feed;
mod http;
pub mod sources;

pub use discord::DiscordChannel;
pub use feed::HttpFeedClient;
pub use sources::{HttpPlanSource, HttpRenderer, HttpScheduleSource};
