//! # Commbot Core
//!
//! Shared vocabulary for the community-operations bot: the error taxonomy,
//! typed configuration, the envelope/event data model, and the traits every
//! external collaborator (feeds, chat sinks, renderers, plan sources) implements.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::BotConfig;
pub use error::{BotError, FailureClass, Result};
pub use types::{Alert, Destination, Envelope, Payload, QueueName};
