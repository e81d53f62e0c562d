//! HTTP route handlers for the returns service.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                          - Liveness
//! GET  /health/ready                    - Readiness (pings the database)
//!
//! # Returns
//! POST /returns                         - Create a return
//! GET  /returns                         - List (status, resolution_type, search, limit, offset)
//! GET  /returns/{id}                    - Return with items and ledger
//! GET  /returns/{id}/history            - Ledger, oldest first
//! POST /returns/{id}/approve|reject|schedule-pickup|in-transit|receive|inspect|complete|cancel|dispute
//! PUT  /returns/{id}/notes              - Replace merchant notes
//! GET  /orders/{order_id}/returns       - Returns against one order
//!
//! # Reasons
//! GET  /return-reasons[?active=true]    - List reasons
//! POST /return-reasons                  - Add a reason
//! GET|PUT|DELETE /return-reasons/{id}
//! POST /return-reasons/{id}/disable|enable
//!
//! # Settings
//! GET|PUT /return-settings
//! ```

use axum::{Router, extract::State, http::StatusCode, routing::get};

use crate::state::AppState;

pub mod reasons;
pub mod returns;
pub mod settings;

/// Build the application router with all routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(health_ready))
        .merge(returns::router())
        .merge(reasons::router())
        .merge(settings::router())
}

/// Health check endpoint (liveness probe).
///
/// Returns 200 OK if the server is running.
async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Verifies the store is reachable before returning OK.
/// Returns 503 Service Unavailable if it is not.
async fn health_ready(State(state): State<AppState>) -> StatusCode {
    let reachable = match state.pool() {
        Some(pool) => sqlx::query("SELECT 1").fetch_one(pool).await.is_ok(),
        None => state.engine().get_settings().await.is_ok(),
    };
    if reachable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
