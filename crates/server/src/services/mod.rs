//! Business logic services for returns.
//!
//! # Services
//!
//! - `lifecycle` - Return creation, state transitions, catalog and settings
//! - `notifications` - Post-commit event outbox and pluggable notifiers

pub mod lifecycle;
pub mod notifications;

pub use lifecycle::{AUTO_APPROVED_REASON, LifecycleEngine, ReturnError};
pub use notifications::{
    EventOutbox, LogNotifier, NotificationWorker, NotifyError, ReturnEvent, ReturnNotifier,
    SlackNotifier, WebhookNotifier,
};
