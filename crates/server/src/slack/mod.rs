//! Slack delivery for return notifications.
//!
//! This module provides:
//! - [`SlackClient`] for posting messages with a bot token
//! - Block Kit types for building rich messages
//! - Message builders for return lifecycle events

mod client;
mod error;
mod messages;
mod types;

pub use client::SlackClient;
pub use error::SlackError;
pub use messages::{build_return_created_message, build_status_changed_message};
pub use types::{Block, ContextElement, PlainText, PostMessageResponse, Text};
