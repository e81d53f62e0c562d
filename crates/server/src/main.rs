//! Returns server - Return/refund lifecycle service.
//!
//! This binary serves the returns API on port 3002.
//!
//! # Security
//!
//! Binds to 127.0.0.1 by default. The API trusts its callers (storefront and
//! admin backends); keep it off the public network.
//!
//! # Architecture
//!
//! - Axum JSON API
//! - `PostgreSQL` for returns, reasons and settings (in-memory when no
//!   database is configured)
//! - Post-commit notifications to logs, Slack and a signed webhook

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::Arc;

use tower_http::trace::{DefaultOnResponse, OnResponse, TraceLayer};
use tracing::Span;

use returns_server::config::{LogFormat, ServerConfig};
use returns_server::db::{self, InMemoryStore, Stores};
use returns_server::services::notifications::{
    self, DEFAULT_OUTBOX_CAPACITY, SHUTDOWN_DRAIN_TIMEOUT,
};
use returns_server::services::{
    EventOutbox, LifecycleEngine, LogNotifier, NotificationWorker, ReturnNotifier, SlackNotifier,
    WebhookNotifier,
};
use returns_server::slack::SlackClient;
use returns_server::state::AppState;
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &ServerConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            sample_rate: config.sentry_sample_rate,
            traces_sample_rate: config.sentry_traces_sample_rate,
            attach_stacktrace: true,
            // Returns carry customer names and phone numbers
            send_default_pii: false,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

/// Build the notifiers enabled by configuration. Logging is always on.
fn build_notifiers(config: &ServerConfig) -> Vec<Arc<dyn ReturnNotifier>> {
    let http = notifications::http_client().expect("Failed to build HTTP client");
    let mut notifiers: Vec<Arc<dyn ReturnNotifier>> = vec![Arc::new(LogNotifier)];

    if let Some(slack) = &config.slack {
        let client = SlackClient::new(
            http.clone(),
            slack.bot_token.clone(),
            slack.channel_id.clone(),
        );
        notifiers.push(Arc::new(SlackNotifier::new(client)));
    }
    if let Some(webhook) = &config.webhook {
        notifiers.push(Arc::new(WebhookNotifier::new(
            http,
            webhook.url.clone(),
            webhook.secret.clone(),
        )));
    }

    notifiers
}

#[tokio::main]
async fn main() {
    // Load configuration from environment (needed for Sentry init)
    let config = ServerConfig::from_env().expect("Failed to load configuration");

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry(&config);

    // Defaults to info level for our crate if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "returns_server=info,tower_http=debug".into());

    let is_json = config.log_format == LogFormat::Json;
    let json_layer = is_json.then(|| tracing_subscriber::fmt::layer().json().flatten_event(true));
    let text_layer = (!is_json).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    // NOTE: Migrations are NOT run automatically on startup.
    // Run them explicitly via: cargo run -p returns-cli -- migrate
    let (stores, pool) = match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url)
                .await
                .expect("Failed to create database pool");
            tracing::info!("Database pool created");
            (
                Stores::postgres(pool.clone(), config.settings_cache_ttl),
                Some(pool),
            )
        }
        None => {
            tracing::warn!("No database configured; returns are kept in memory only");
            (Stores::in_memory(&InMemoryStore::new()), None)
        }
    };

    let (outbox, events) = EventOutbox::new(DEFAULT_OUTBOX_CAPACITY);
    let worker = NotificationWorker::new(build_notifiers(&config)).spawn(events);

    let engine = LifecycleEngine::new(stores, outbox);
    let settings = engine
        .verify_settings()
        .await
        .expect("Stored return settings are invalid");
    tracing::info!(
        returns_enabled = settings.returns_enabled,
        window_days = settings.return_window_days,
        auto_approve = settings.auto_approve_returns,
        "Return settings loaded"
    );

    let state = AppState::new(engine, pool);

    let app = returns_server::app(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &Span| {
                        span.record("status", response.status().as_u16());
                        #[allow(clippy::cast_possible_truncation)]
                        span.record("latency_ms", latency.as_millis() as u64);
                        DefaultOnResponse::default().on_response(response, latency, span);
                    },
                ),
        )
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction());

    let addr = config.socket_addr();
    tracing::info!("returns listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // The router (and with it the last outbox sender) is gone; let the
    // worker deliver what is queued, up to a deadline.
    match tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, worker).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("Notification worker failed: {e}"),
        Err(_) => tracing::warn!(
            timeout_secs = SHUTDOWN_DRAIN_TIMEOUT.as_secs(),
            "Notification worker did not drain in time, dropping queued events"
        ),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
