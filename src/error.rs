use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::gemini::UpstreamError;
use crate::interpreter::PlanError;
use crate::store::StoreError;

/// Errors surfaced to HTTP callers as `{ error, details? }`
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error("Invalid request body")]
    InvalidBody(String),
    #[error("{0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Plan(PlanError::MissingIdentifier) | Self::InvalidBody(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Plan(PlanError::MissingCredential) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Plan(PlanError::Upstream(_)) => StatusCode::BAD_GATEWAY,
            Self::NotFound(_) | Self::Storage(StoreError::NotFound) => StatusCode::NOT_FOUND,
            Self::Storage(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn details(&self) -> Option<String> {
        match self {
            Self::InvalidBody(details) => Some(details.clone()),
            Self::Plan(PlanError::Upstream(UpstreamError::Http { body, .. })) => Some(body.clone()),
            Self::Plan(PlanError::Upstream(other)) => Some(other.to_string()),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "request failed");
        }

        let body = ErrorBody {
            error: self.to_string(),
            details: self.details(),
        };
        (status, Json(body)).into_response()
    }
}
