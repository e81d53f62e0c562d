//! Return reason catalog API handlers.

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    routing::{get, post},
};
use serde::Deserialize;

use returns_core::ReturnReasonId;

use crate::error::AppError;
use crate::models::{ReasonInput, ReturnReason};
use crate::state::AppState;

/// Build the reason catalog router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/return-reasons", get(list).post(create))
        .route(
            "/return-reasons/{id}",
            get(show).put(update).delete(delete),
        )
        .route("/return-reasons/{id}/disable", post(disable))
        .route("/return-reasons/{id}/enable", post(enable))
}

/// Query for listing reasons.
#[derive(Debug, Default, Deserialize)]
pub struct ReasonQuery {
    /// Only reasons offered to customers.
    #[serde(default)]
    pub active: bool,
}

/// List reasons by display position.
///
/// # Errors
///
/// Returns 400 for a malformed query or 500 on store failure.
pub async fn list(
    State(state): State<AppState>,
    query: Result<Query<ReasonQuery>, QueryRejection>,
) -> Result<Json<Vec<ReturnReason>>, AppError> {
    let Query(ReasonQuery { active }) = query?;
    Ok(Json(state.engine().list_reasons(active).await?))
}

/// One reason.
///
/// # Errors
///
/// Returns 404 for an unknown reason.
pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<ReturnReasonId>,
) -> Result<Json<ReturnReason>, AppError> {
    Ok(Json(state.engine().get_reason(id).await?))
}

/// Add a reason.
///
/// # Errors
///
/// Returns 422 for a blank label or 400 for a malformed body.
pub async fn create(
    State(state): State<AppState>,
    body: Result<Json<ReasonInput>, JsonRejection>,
) -> Result<(StatusCode, Json<ReturnReason>), AppError> {
    let Json(input) = body?;
    let reason = state.engine().create_reason(&input).await?;
    Ok((StatusCode::CREATED, Json(reason)))
}

/// Replace a reason.
///
/// # Errors
///
/// Returns 404 for an unknown reason or 422 for a blank label.
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<ReturnReasonId>,
    body: Result<Json<ReasonInput>, JsonRejection>,
) -> Result<Json<ReturnReason>, AppError> {
    let Json(input) = body?;
    Ok(Json(state.engine().update_reason(id, &input).await?))
}

/// Soft-disable a reason.
///
/// # Errors
///
/// Returns 404 for an unknown reason.
pub async fn disable(
    State(state): State<AppState>,
    Path(id): Path<ReturnReasonId>,
) -> Result<Json<ReturnReason>, AppError> {
    Ok(Json(state.engine().set_reason_active(id, false).await?))
}

/// Re-enable a reason.
///
/// # Errors
///
/// Returns 404 for an unknown reason.
pub async fn enable(
    State(state): State<AppState>,
    Path(id): Path<ReturnReasonId>,
) -> Result<Json<ReturnReason>, AppError> {
    Ok(Json(state.engine().set_reason_active(id, true).await?))
}

/// Delete a reason no return references.
///
/// # Errors
///
/// Returns 409 when returns still reference the reason, 404 when unknown.
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<ReturnReasonId>,
) -> Result<StatusCode, AppError> {
    state.engine().delete_reason(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
