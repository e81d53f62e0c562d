//! Return request API handlers.

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    routing::{get, post, put},
};
use serde::Deserialize;

use returns_core::{OrderId, ReturnRequestId, ReturnStatus};

use crate::error::AppError;
use crate::models::{
    CreateReturnInput, ReturnDetail, ReturnFilter, ReturnRequest, StatusHistoryEvent,
    TransitionInput,
};
use crate::state::AppState;

/// Build the returns router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/returns", get(list).post(create))
        .route("/returns/{id}", get(show))
        .route("/returns/{id}/history", get(history))
        .route("/returns/{id}/approve", post(approve))
        .route("/returns/{id}/reject", post(reject))
        .route("/returns/{id}/schedule-pickup", post(schedule_pickup))
        .route("/returns/{id}/in-transit", post(in_transit))
        .route("/returns/{id}/receive", post(receive))
        .route("/returns/{id}/inspect", post(inspect))
        .route("/returns/{id}/complete", post(complete))
        .route("/returns/{id}/cancel", post(cancel))
        .route("/returns/{id}/dispute", post(dispute))
        .route("/returns/{id}/notes", put(update_notes))
        .route("/orders/{order_id}/returns", get(list_for_order))
}

/// Body for replacing merchant notes.
#[derive(Debug, Deserialize)]
pub struct NotesRequest {
    #[serde(default)]
    pub notes: Option<String>,
}

type TransitionBody = Result<Option<Json<TransitionInput>>, JsonRejection>;

/// Create a return request.
///
/// # Errors
///
/// Returns 422 when the request breaks policy, 404 for an unknown order or
/// reason, or 400 for a malformed body.
pub async fn create(
    State(state): State<AppState>,
    body: Result<Json<CreateReturnInput>, JsonRejection>,
) -> Result<(StatusCode, Json<ReturnDetail>), AppError> {
    let Json(input) = body?;
    let detail = state.engine().create(input).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

/// List returns, newest first.
///
/// # Errors
///
/// Returns 400 for a malformed query or 500 on store failure.
pub async fn list(
    State(state): State<AppState>,
    query: Result<Query<ReturnFilter>, QueryRejection>,
) -> Result<Json<Vec<ReturnRequest>>, AppError> {
    let Query(filter) = query?;
    Ok(Json(state.engine().list(&filter).await?))
}

/// A return with its items and ledger.
///
/// # Errors
///
/// Returns 404 for an unknown return.
pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<ReturnRequestId>,
) -> Result<Json<ReturnDetail>, AppError> {
    Ok(Json(state.engine().get(id).await?))
}

/// The ledger of one return, oldest first.
///
/// # Errors
///
/// Returns 404 for an unknown return.
pub async fn history(
    State(state): State<AppState>,
    Path(id): Path<ReturnRequestId>,
) -> Result<Json<Vec<StatusHistoryEvent>>, AppError> {
    Ok(Json(state.engine().history(id).await?))
}

/// Every return against an order.
///
/// # Errors
///
/// Returns 500 on store failure.
pub async fn list_for_order(
    State(state): State<AppState>,
    Path(order_id): Path<OrderId>,
) -> Result<Json<Vec<ReturnRequest>>, AppError> {
    Ok(Json(state.engine().list_for_order(order_id).await?))
}

/// Replace merchant notes.
///
/// # Errors
///
/// Returns 404 for an unknown return or 400 for a malformed body.
pub async fn update_notes(
    State(state): State<AppState>,
    Path(id): Path<ReturnRequestId>,
    body: Result<Json<NotesRequest>, JsonRejection>,
) -> Result<Json<ReturnRequest>, AppError> {
    let Json(NotesRequest { notes }) = body?;
    Ok(Json(
        state.engine().update_merchant_notes(id, notes).await?,
    ))
}

// =============================================================================
// Transitions
// =============================================================================

async fn move_to(
    state: &AppState,
    id: ReturnRequestId,
    target: ReturnStatus,
    body: TransitionBody,
) -> Result<Json<ReturnRequest>, AppError> {
    let input = body?.map(|Json(input)| input).unwrap_or_default();
    Ok(Json(state.engine().transition(id, target, input).await?))
}

/// `requested|disputed → approved`.
///
/// # Errors
///
/// Returns 409 for an illegal or concurrent transition, 404 for an unknown
/// return.
pub async fn approve(
    State(state): State<AppState>,
    Path(id): Path<ReturnRequestId>,
    body: TransitionBody,
) -> Result<Json<ReturnRequest>, AppError> {
    move_to(&state, id, ReturnStatus::Approved, body).await
}

/// `requested → rejected`; the body must carry `rejection_reason`.
///
/// # Errors
///
/// Returns 422 without a rejection reason, otherwise as [`approve`].
pub async fn reject(
    State(state): State<AppState>,
    Path(id): Path<ReturnRequestId>,
    body: TransitionBody,
) -> Result<Json<ReturnRequest>, AppError> {
    move_to(&state, id, ReturnStatus::Rejected, body).await
}

/// `approved → pickup_scheduled`.
///
/// # Errors
///
/// See [`approve`].
pub async fn schedule_pickup(
    State(state): State<AppState>,
    Path(id): Path<ReturnRequestId>,
    body: TransitionBody,
) -> Result<Json<ReturnRequest>, AppError> {
    move_to(&state, id, ReturnStatus::PickupScheduled, body).await
}

/// `pickup_scheduled → in_transit`.
///
/// # Errors
///
/// See [`approve`].
pub async fn in_transit(
    State(state): State<AppState>,
    Path(id): Path<ReturnRequestId>,
    body: TransitionBody,
) -> Result<Json<ReturnRequest>, AppError> {
    move_to(&state, id, ReturnStatus::InTransit, body).await
}

/// Goods arrived at the warehouse.
///
/// # Errors
///
/// See [`approve`].
pub async fn receive(
    State(state): State<AppState>,
    Path(id): Path<ReturnRequestId>,
    body: TransitionBody,
) -> Result<Json<ReturnRequest>, AppError> {
    move_to(&state, id, ReturnStatus::Received, body).await
}

/// `received → inspected`.
///
/// # Errors
///
/// See [`approve`].
pub async fn inspect(
    State(state): State<AppState>,
    Path(id): Path<ReturnRequestId>,
    body: TransitionBody,
) -> Result<Json<ReturnRequest>, AppError> {
    move_to(&state, id, ReturnStatus::Inspected, body).await
}

/// Settle the return.
///
/// # Errors
///
/// See [`approve`].
pub async fn complete(
    State(state): State<AppState>,
    Path(id): Path<ReturnRequestId>,
    body: TransitionBody,
) -> Result<Json<ReturnRequest>, AppError> {
    move_to(&state, id, ReturnStatus::Completed, body).await
}

/// Abandon the return.
///
/// # Errors
///
/// See [`approve`].
pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<ReturnRequestId>,
    body: TransitionBody,
) -> Result<Json<ReturnRequest>, AppError> {
    move_to(&state, id, ReturnStatus::Cancelled, body).await
}

/// Flag the return as disputed.
///
/// # Errors
///
/// See [`approve`].
pub async fn dispute(
    State(state): State<AppState>,
    Path(id): Path<ReturnRequestId>,
    body: TransitionBody,
) -> Result<Json<ReturnRequest>, AppError> {
    move_to(&state, id, ReturnStatus::Disputed, body).await
}
