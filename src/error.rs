use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::models::step::FlowStep;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not authenticated: {0}")]
    NotAuthenticated(String),

    #[error("location permission denied")]
    PermissionDenied,

    #[error("location services are turned off")]
    LocationServicesOff,

    #[error("{action} failed: {reason}")]
    ActionFailed { action: String, reason: String },

    #[error("malformed assignment: {0}")]
    MalformedAssignment(String),

    #[error("stale event: implies {implied} while flow is at {current}")]
    StaleEvent { current: FlowStep, implied: FlowStep },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn action_failed(action: &str, reason: impl ToString) -> Self {
        AppError::ActionFailed {
            action: action.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "bad_request",
            AppError::Conflict(_) => "conflict",
            AppError::NotAuthenticated(_) => "not_authenticated",
            AppError::PermissionDenied => "permission_denied",
            AppError::LocationServicesOff => "location_services_off",
            AppError::ActionFailed { .. } => "action_failed",
            AppError::MalformedAssignment(_) => "malformed_assignment",
            AppError::StaleEvent { .. } => "stale_event",
            AppError::Storage(_) => "storage",
            AppError::Channel(_) => "channel",
            AppError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::BadRequest(_) | AppError::MalformedAssignment(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) | AppError::StaleEvent { .. } => StatusCode::CONFLICT,
            AppError::NotAuthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::PermissionDenied => StatusCode::FORBIDDEN,
            AppError::LocationServicesOff => StatusCode::PRECONDITION_FAILED,
            AppError::ActionFailed { .. } | AppError::Channel(_) => StatusCode::BAD_GATEWAY,
            AppError::Storage(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string(),
            "kind": self.kind(),
        }));

        (status, body).into_response()
    }
}
