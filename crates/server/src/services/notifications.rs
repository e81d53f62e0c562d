//! Post-commit notification of return lifecycle events.
//!
//! The lifecycle engine publishes [`ReturnEvent`]s to an [`EventOutbox`] only
//! after its transaction commits. A [`NotificationWorker`] drains the outbox in
//! the background and hands each event to every configured
//! [`ReturnNotifier`]. Delivery failures are logged and dropped; they never
//! affect the operation that produced the event.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use sha2::Sha256;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use returns_core::{Money, OrderId, ResolutionType, ReturnNumber, ReturnRequestId, ReturnStatus};

use crate::slack::{self, SlackClient, SlackError};

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "X-Returns-Signature";

/// Oldest signed timestamp a receiver should accept (5 minutes).
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Default outbox capacity.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 1024;

/// Upper bound on one notifier delivering one event.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// How long shutdown waits for the worker to drain the outbox.
pub const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(15);

/// HTTP client shared by the Slack and webhook notifiers.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialized.
pub fn http_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .timeout(DELIVERY_TIMEOUT)
        .build()
}

// =============================================================================
// Events
// =============================================================================

/// Something that happened to a return, published after commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReturnEvent {
    /// A return was created (possibly already auto-approved).
    ReturnCreated {
        return_id: ReturnRequestId,
        return_number: ReturnNumber,
        order_id: OrderId,
        status: ReturnStatus,
        resolution_type: ResolutionType,
        net_refund_amount: Money,
        at: DateTime<Utc>,
    },
    /// A return moved between statuses.
    ///
    /// Inventory consumers restock on `to = completed` using
    /// `resolution_type`.
    ReturnStatusChanged {
        return_id: ReturnRequestId,
        return_number: ReturnNumber,
        order_id: OrderId,
        from: ReturnStatus,
        to: ReturnStatus,
        resolution_type: ResolutionType,
        change_reason: Option<String>,
        at: DateTime<Utc>,
    },
}

impl ReturnEvent {
    /// The return this event is about.
    #[must_use]
    pub const fn return_id(&self) -> ReturnRequestId {
        match self {
            Self::ReturnCreated { return_id, .. } | Self::ReturnStatusChanged { return_id, .. } => {
                *return_id
            }
        }
    }

    /// Event name as serialized.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ReturnCreated { .. } => "return_created",
            Self::ReturnStatusChanged { .. } => "return_status_changed",
        }
    }
}

// =============================================================================
// Notifiers
// =============================================================================

/// Errors that can occur while delivering a notification.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Slack delivery failed.
    #[error(transparent)]
    Slack(#[from] SlackError),

    /// HTTP request failed.
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The receiver answered with a non-success status.
    #[error("webhook returned status {0}")]
    Status(u16),

    /// Event could not be encoded.
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    /// Signing failed.
    #[error("failed to sign payload: {0}")]
    Signature(String),

    /// The notifier did not finish in time.
    #[error("delivery timed out after {0:?}")]
    TimedOut(Duration),
}

/// A sink for return events.
#[async_trait]
pub trait ReturnNotifier: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Deliver one event.
    async fn notify(&self, event: &ReturnEvent) -> Result<(), NotifyError>;
}

/// Writes every event to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl ReturnNotifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn notify(&self, event: &ReturnEvent) -> Result<(), NotifyError> {
        match event {
            ReturnEvent::ReturnCreated {
                return_number,
                status,
                net_refund_amount,
                ..
            } => info!(
                return_number = %return_number,
                status = %status,
                net_refund = %net_refund_amount,
                "Return created"
            ),
            ReturnEvent::ReturnStatusChanged {
                return_number,
                from,
                to,
                ..
            } => info!(
                return_number = %return_number,
                from = %from,
                to = %to,
                "Return status changed"
            ),
        }
        Ok(())
    }
}

/// Posts events to a Slack channel.
#[derive(Debug, Clone)]
pub struct SlackNotifier {
    client: SlackClient,
}

impl SlackNotifier {
    /// Create a notifier around a Slack client.
    #[must_use]
    pub const fn new(client: SlackClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ReturnNotifier for SlackNotifier {
    fn name(&self) -> &'static str {
        "slack"
    }

    async fn notify(&self, event: &ReturnEvent) -> Result<(), NotifyError> {
        let (blocks, fallback) = match event {
            ReturnEvent::ReturnCreated {
                return_number,
                order_id,
                status,
                resolution_type,
                net_refund_amount,
                ..
            } => (
                slack::build_return_created_message(
                    return_number,
                    *order_id,
                    *status,
                    *resolution_type,
                    *net_refund_amount,
                ),
                format!("Return {return_number} requested"),
            ),
            ReturnEvent::ReturnStatusChanged {
                return_number,
                from,
                to,
                resolution_type,
                change_reason,
                ..
            } => (
                slack::build_status_changed_message(
                    return_number,
                    *from,
                    *to,
                    *resolution_type,
                    change_reason.as_deref(),
                ),
                format!("Return {return_number}: {from} → {to}"),
            ),
        };

        self.client.post_message(blocks, Some(&fallback)).await?;
        Ok(())
    }
}

/// POSTs events as signed JSON to an HTTP endpoint.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
    secret: SecretString,
}

impl std::fmt::Debug for WebhookNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookNotifier")
            .field("url", &self.url)
            .field("secret", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl WebhookNotifier {
    /// Create a webhook notifier.
    #[must_use]
    pub const fn new(client: Client, url: String, secret: SecretString) -> Self {
        Self {
            client,
            url,
            secret,
        }
    }
}

#[async_trait]
impl ReturnNotifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    #[instrument(skip(self, event), fields(event = event.kind(), return_id = %event.return_id()))]
    async fn notify(&self, event: &ReturnEvent) -> Result<(), NotifyError> {
        let body = serde_json::to_string(event)?;
        let timestamp = unix_now()?;
        let signature = sign_payload(self.secret.expose_secret(), timestamp, &body)?;

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }

        debug!("Webhook delivered");
        Ok(())
    }
}

fn unix_now() -> Result<i64, NotifyError> {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| NotifyError::Signature(e.to_string()))?
        .as_secs();
    i64::try_from(secs).map_err(|_| NotifyError::Signature("System time overflow".to_string()))
}

/// Sign a webhook body.
///
/// Produces `t=<unix seconds>,v1=<hex HMAC-SHA256 of "<t>.<body>">`.
///
/// # Errors
///
/// Returns error if the secret cannot key the MAC.
pub fn sign_payload(secret: &str, timestamp: i64, body: &str) -> Result<String, NotifyError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| NotifyError::Signature(e.to_string()))?;
    mac.update(format!("{timestamp}.{body}").as_bytes());
    Ok(format!(
        "t={timestamp},v1={}",
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Check a signature header produced by [`sign_payload`].
///
/// Receivers use this to authenticate deliveries; `now` is unix seconds.
#[must_use]
pub fn verify_signature(secret: &str, header: &str, body: &str, now: i64) -> bool {
    let mut timestamp = None;
    let mut provided = None;
    for part in header.split(',') {
        match part.split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => provided = Some(value),
            _ => {}
        }
    }

    let (Some(timestamp), Some(provided)) = (timestamp, provided) else {
        return false;
    };
    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return false;
    }

    sign_payload(secret, timestamp, body).is_ok_and(|expected| {
        constant_time_compare(&expected, &format!("t={timestamp},v1={provided}"))
    })
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}

// =============================================================================
// Outbox
// =============================================================================

/// Publishing half of the notification channel.
#[derive(Debug, Clone)]
pub struct EventOutbox {
    tx: mpsc::Sender<ReturnEvent>,
}

impl EventOutbox {
    /// Create an outbox and the receiver a [`NotificationWorker`] drains.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ReturnEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue an event. Never blocks; drops the event if the queue is full or
    /// the worker is gone.
    pub fn publish(&self, event: ReturnEvent) {
        if let Err(e) = self.tx.try_send(event) {
            let event = match &e {
                mpsc::error::TrySendError::Full(event)
                | mpsc::error::TrySendError::Closed(event) => event,
            };
            warn!(
                event = event.kind(),
                return_id = %event.return_id(),
                error = %e,
                "Dropping return event"
            );
        }
    }
}

/// Background task fanning events out to notifiers.
pub struct NotificationWorker {
    notifiers: Vec<Arc<dyn ReturnNotifier>>,
    timeout: Duration,
}

impl std::fmt::Debug for NotificationWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.notifiers.iter().map(|n| n.name()).collect();
        f.debug_struct("NotificationWorker")
            .field("notifiers", &names)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl NotificationWorker {
    /// Create a worker delivering to `notifiers` in order.
    #[must_use]
    pub fn new(notifiers: Vec<Arc<dyn ReturnNotifier>>) -> Self {
        Self {
            notifiers,
            timeout: DELIVERY_TIMEOUT,
        }
    }

    /// Override the per-delivery timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn deliver(
        &self,
        notifier: &dyn ReturnNotifier,
        event: &ReturnEvent,
    ) -> Result<(), NotifyError> {
        tokio::time::timeout(self.timeout, notifier.notify(event))
            .await
            .unwrap_or(Err(NotifyError::TimedOut(self.timeout)))
    }

    /// Run until every [`EventOutbox`] clone is dropped.
    pub async fn run(self, mut rx: mpsc::Receiver<ReturnEvent>) {
        info!(notifiers = ?self, "Notification worker started");

        while let Some(event) = rx.recv().await {
            for notifier in &self.notifiers {
                if let Err(e) = self.deliver(notifier.as_ref(), &event).await {
                    warn!(
                        notifier = notifier.name(),
                        event = event.kind(),
                        return_id = %event.return_id(),
                        error = %e,
                        "Failed to deliver return event"
                    );
                }
            }
        }

        info!("Outbox closed, notification worker stopping");
    }

    /// Spawn [`Self::run`] on the current runtime.
    pub fn spawn(self, rx: mpsc::Receiver<ReturnEvent>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(rx))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::NaiveDate;

    use super::*;

    fn created() -> ReturnEvent {
        ReturnEvent::ReturnCreated {
            return_id: ReturnRequestId::new(1),
            return_number: ReturnNumber::new(
                NaiveDate::from_ymd_opt(2026, 10, 17).unwrap(),
                "AB12CD",
            )
            .unwrap(),
            order_id: OrderId::new(7),
            status: ReturnStatus::Requested,
            resolution_type: ResolutionType::Refund,
            net_refund_amount: Money::from_cents(195_000),
            at: Utc::now(),
        }
    }

    struct Failing;

    #[async_trait]
    impl ReturnNotifier for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn notify(&self, _event: &ReturnEvent) -> Result<(), NotifyError> {
            Err(NotifyError::Status(503))
        }
    }

    struct Hanging;

    #[async_trait]
    impl ReturnNotifier for Hanging {
        fn name(&self) -> &'static str {
            "hanging"
        }

        async fn notify(&self, _event: &ReturnEvent) -> Result<(), NotifyError> {
            std::future::pending().await
        }
    }

    #[derive(Default)]
    struct Counting(AtomicUsize);

    #[async_trait]
    impl ReturnNotifier for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn notify(&self, _event: &ReturnEvent) -> Result<(), NotifyError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let json = serde_json::to_value(created()).unwrap();
        assert_eq!(json["event"], "return_created");
        assert_eq!(json["return_number"], "RET-20261017-AB12CD");
        assert_eq!(json["status"], "requested");
    }

    #[test]
    fn test_signature_round_trip() {
        let header = sign_payload("whsec-test", 1_700_000_000, r#"{"a":1}"#).unwrap();
        assert!(header.starts_with("t=1700000000,v1="));
        assert!(verify_signature(
            "whsec-test",
            &header,
            r#"{"a":1}"#,
            1_700_000_010
        ));
    }

    #[test]
    fn test_signature_rejects_tampered_body() {
        let header = sign_payload("whsec-test", 1_700_000_000, "original").unwrap();
        assert!(!verify_signature("whsec-test", &header, "tampered", 1_700_000_000));
    }

    #[test]
    fn test_signature_rejects_old_timestamp() {
        let header = sign_payload("whsec-test", 1_700_000_000, "body").unwrap();
        assert!(!verify_signature("whsec-test", &header, "body", 1_700_000_600));
    }

    #[test]
    fn test_signature_rejects_malformed_header() {
        assert!(!verify_signature("whsec-test", "v1=abc", "body", 0));
        assert!(!verify_signature("whsec-test", "t=abc,v1=abc", "body", 0));
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("hello", "hello"));
        assert!(!constant_time_compare("hello", "world"));
        assert!(!constant_time_compare("hello", "hell"));
    }

    #[tokio::test]
    async fn test_worker_survives_failing_notifier() {
        let counting = Arc::new(Counting::default());
        let worker = NotificationWorker::new(vec![Arc::new(Failing), counting.clone()]);
        let (outbox, rx) = EventOutbox::new(8);

        outbox.publish(created());
        outbox.publish(created());
        drop(outbox);

        worker.run(rx).await;
        assert_eq!(counting.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_hung_notifier_does_not_block_the_worker() {
        let counting = Arc::new(Counting::default());
        let worker = NotificationWorker::new(vec![Arc::new(Hanging), counting.clone()])
            .with_timeout(Duration::from_millis(20));
        let (outbox, rx) = EventOutbox::new(8);

        outbox.publish(created());
        outbox.publish(created());
        drop(outbox);

        tokio::time::timeout(Duration::from_secs(5), worker.run(rx))
            .await
            .unwrap();
        assert_eq!(counting.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_publish_without_worker_does_not_panic() {
        let (outbox, rx) = EventOutbox::new(1);
        drop(rx);
        outbox.publish(created());
    }
}
