//! Unified error handling for the returns API.

use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use thiserror::Error;

use crate::services::ReturnError;

/// Application-level error type for the returns API.
#[derive(Debug, Error)]
pub enum AppError {
    /// Lifecycle engine refused or failed the operation.
    #[error(transparent)]
    Return(#[from] ReturnError),

    /// Malformed request body or query string.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl AppError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Return(err) => match err {
                ReturnError::NotFound(_) => StatusCode::NOT_FOUND,
                ReturnError::IllegalTransition { .. }
                | ReturnError::ConcurrentModification { .. }
                | ReturnError::ReasonInUse { .. } => StatusCode::CONFLICT,
                ReturnError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
                ReturnError::InvalidOrderState { .. }
                | ReturnError::WindowExpired { .. }
                | ReturnError::ResolutionNotAllowed(_)
                | ReturnError::QuantityExceeded { .. }
                | ReturnError::ReturnsDisabled
                | ReturnError::PhotosRequired
                | ReturnError::TooManyPhotos { .. }
                | ReturnError::InvalidInput(_)
                | ReturnError::MissingRejectionReason { .. }
                | ReturnError::InvalidSettings(_) => StatusCode::UNPROCESSABLE_ENTITY,
            },
        }
    }

    /// Stable machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Return(err) => match err {
                ReturnError::InvalidOrderState { .. } => "invalid_order_state",
                ReturnError::WindowExpired { .. } => "window_expired",
                ReturnError::ResolutionNotAllowed(_) => "resolution_not_allowed",
                ReturnError::QuantityExceeded { .. } => "quantity_exceeded",
                ReturnError::ReturnsDisabled => "returns_disabled",
                ReturnError::PhotosRequired => "photos_required",
                ReturnError::TooManyPhotos { .. } => "too_many_photos",
                ReturnError::InvalidInput(_) => "invalid_input",
                ReturnError::IllegalTransition { .. } => "illegal_transition",
                ReturnError::MissingRejectionReason { .. } => "missing_rejection_reason",
                ReturnError::ConcurrentModification { .. } => "concurrent_modification",
                ReturnError::NotFound(_) => "not_found",
                ReturnError::ReasonInUse { .. } => "reason_in_use",
                ReturnError::InvalidSettings(_) => "invalid_settings",
                ReturnError::Repository(_) => "internal_error",
            },
        }
    }

    /// Structured context for the client, if any.
    fn details(&self) -> Value {
        let Self::Return(err) = self else {
            return Value::Null;
        };
        match err {
            ReturnError::InvalidOrderState { order_id, status } => {
                json!({ "order_id": order_id, "status": status.to_string() })
            }
            ReturnError::WindowExpired {
                delivered_at,
                window_days,
            } => json!({ "delivered_at": delivered_at, "window_days": window_days }),
            ReturnError::ResolutionNotAllowed(resolution) => {
                json!({ "resolution_type": resolution })
            }
            ReturnError::QuantityExceeded {
                order_item_id,
                ordered,
                already_claimed,
                requested,
            } => json!({
                "order_item_id": order_item_id,
                "ordered": ordered,
                "already_claimed": already_claimed,
                "requested": requested,
            }),
            ReturnError::TooManyPhotos { max, got } => json!({ "max": max, "got": got }),
            ReturnError::IllegalTransition { from, to, allowed } => {
                json!({ "current": from, "target": to, "allowed": allowed })
            }
            ReturnError::MissingRejectionReason { current } => json!({ "current": current }),
            ReturnError::ConcurrentModification { id } => json!({ "return_id": id }),
            ReturnError::ReasonInUse { id } => json!({ "reason_id": id }),
            ReturnError::InvalidSettings(problems) => json!({ "problems": problems }),
            ReturnError::ReturnsDisabled
            | ReturnError::PhotosRequired
            | ReturnError::InvalidInput(_)
            | ReturnError::NotFound(_)
            | ReturnError::Repository(_) => Value::Null,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Log server errors with Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Returns request error"
            );
        }

        // Don't expose internal error details to clients
        let message = if status.is_server_error() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = json!({
            "error": self.code(),
            "message": message,
            "details": self.details(),
        });

        (status, Json(body)).into_response()
    }
}
