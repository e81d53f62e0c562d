//! Return policy settings API handlers.

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    routing::get,
};

use crate::error::AppError;
use crate::models::ReturnSettings;
use crate::state::AppState;

/// Build the settings router.
pub fn router() -> Router<AppState> {
    Router::new().route("/return-settings", get(show).put(update))
}

/// Current return policy.
///
/// # Errors
///
/// Returns 500 on store failure.
pub async fn show(State(state): State<AppState>) -> Result<Json<ReturnSettings>, AppError> {
    Ok(Json(state.engine().get_settings().await?))
}

/// Replace the return policy. Omitted fields take their defaults.
///
/// # Errors
///
/// Returns 422 listing every invalid field, or 400 for a malformed body.
pub async fn update(
    State(state): State<AppState>,
    body: Result<Json<ReturnSettings>, JsonRejection>,
) -> Result<Json<ReturnSettings>, AppError> {
    let Json(settings) = body?;
    Ok(Json(state.engine().update_settings(&settings).await?))
}
