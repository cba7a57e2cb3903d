//! Mapping of domain errors to HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use brandlens_core::{DetectionError, GatewayError, RepositoryError, TemplateError};

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    BadGateway(String),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(self) -> String {
        match self {
            ApiError::BadRequest(m)
            | ApiError::NotFound(m)
            | ApiError::Conflict(m)
            | ApiError::BadGateway(m)
            | ApiError::Internal(m) => m,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = ?self, "Request failed");
        }
        (status, Json(ErrorResponse { error: self.message() })).into_response()
    }
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Validation { .. } | GatewayError::Configuration { .. } => {
                ApiError::BadRequest(e.to_string())
            }
            GatewayError::Upstream { .. } => ApiError::BadGateway(e.to_string()),
        }
    }
}

impl From<RepositoryError> for ApiError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound(_) => ApiError::NotFound(e.to_string()),
            RepositoryError::Conflict(_) => ApiError::Conflict(e.to_string()),
            RepositoryError::Database(_) | RepositoryError::Serialization(_) => {
                ApiError::Internal(e.to_string())
            }
        }
    }
}

impl From<DetectionError> for ApiError {
    fn from(e: DetectionError) -> Self {
        match e {
            DetectionError::Validation(_) => ApiError::BadRequest(e.to_string()),
            DetectionError::Persistence(_) | DetectionError::InvalidTransition { .. } => {
                ApiError::Internal(e.to_string())
            }
        }
    }
}

impl From<TemplateError> for ApiError {
    fn from(e: TemplateError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}
