//! API error taxonomy and its OpenAI-style JSON rendering.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Errors surfaced to API clients as `{"error": {"message", "type"}}`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or missing client input. Detected before any upstream call.
    #[error("{0}")]
    InvalidRequest(String),

    /// The inference API answered with a non-success status.
    #[error("HuggingFace API error: {message}")]
    Upstream { status: StatusCode, message: String },

    /// The inference API could not be reached or did not answer in time.
    #[error("HuggingFace API request failed: {0}")]
    Transport(String),
}

impl ApiError {
    /// Value of the `type` field in the error body.
    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::InvalidRequest(_) => "invalid_request_error",
            ApiError::Upstream { .. } | ApiError::Transport(_) => "upstream_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Upstream { status, .. }
                if status.is_client_error() || status.is_server_error() =>
            {
                *status
            }
            ApiError::Upstream { .. } | ApiError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidRequest(rejection.body_text())
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Transport(e.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>, kind: &'static str) -> Self {
        Self {
            error: ErrorBody {
                message: message.into(),
                kind,
            },
        }
    }

    pub fn internal() -> Self {
        Self::new("Internal server error", "internal_server_error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), "{self}");
        }
        let body = ErrorResponse::new(self.to_string(), self.error_type());
        (status, Json(body)).into_response()
    }
}
