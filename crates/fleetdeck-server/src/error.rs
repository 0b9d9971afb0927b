//! HTTP error mapping
//!
//! Every handler returns `ApiError` on failure. Cluster and tool errors are
//! classified here and rendered as `{status, message, details?}`; raw API
//! server errors are logged but never sent to the client.

use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use fleetdeck_core::CoreError;
use fleetdeck_kube::KubeError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Timeout(String),

    #[error("{message}")]
    ToolFailure { message: String, details: Option<String> },

    #[error("{0}")]
    Internal(String),
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    status: u16,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a str>,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::ToolFailure { .. } | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();
        let details = match &self {
            ApiError::ToolFailure { details, .. } => details.as_deref(),
            _ => None,
        };
        let body = ErrorBody {
            status: status.as_u16(),
            message: &message,
            details,
        };
        (status, Json(body)).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        if e.is_validation() {
            ApiError::BadRequest(e.to_string())
        } else {
            tracing::error!(error = %e, "Internal error");
            ApiError::Internal(e.to_string())
        }
    }
}

impl From<KubeError> for ApiError {
    fn from(e: KubeError) -> Self {
        if e.is_validation() {
            return ApiError::BadRequest(e.to_string());
        }
        if e.is_timeout() {
            return ApiError::Timeout(e.to_string());
        }
        match e {
            KubeError::NamespaceNotFound { .. } => ApiError::NotFound(e.to_string()),
            KubeError::ToolFailed { message, output, .. } => ApiError::ToolFailure {
                message: format!("Deployment failed: {}", message),
                details: (!output.is_empty()).then_some(output),
            },
            KubeError::ToolUnavailable { .. } => {
                tracing::error!(error = %e, "External tool unavailable");
                ApiError::Internal(e.to_string())
            }
            e if e.is_not_found() => ApiError::NotFound("Resource not found".to_string()),
            e if e.is_conflict() => ApiError::Conflict("Resource already exists or was modified".to_string()),
            e => {
                tracing::error!(error = %e, "Cluster request failed");
                ApiError::Internal("Cluster request failed".to_string())
            }
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        ApiError::BadRequest(format!("Invalid upload: {}", e.body_text()))
    }
}
