//! HTTP mapping for [`CacheError`]
//!
//! Error bodies are JSON `{"error": {"code", "message"}}`. Server-side
//! failures are logged in full and answered with a generic message.

use crate::error::CacheError;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

/// JSON error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable code, e.g. `NOT_FOUND`
    pub code: String,
    pub message: String,
}

impl CacheError {
    /// HTTP status and machine-readable code for this error
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::ScopeNotFound(_) => (StatusCode::NOT_FOUND, "SCOPE_NOT_FOUND"),
            Self::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED"),
            Self::Unauthorized { .. } => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::PathEscape(_) => (StatusCode::BAD_REQUEST, "PATH_ESCAPE"),
            Self::InvalidKey { .. } => (StatusCode::BAD_REQUEST, "INVALID_KEY"),
            Self::KeyIsDirectory(_) => (StatusCode::CONFLICT, "KEY_IS_DIRECTORY"),
            Self::KeyUnderFile(_) => (StatusCode::CONFLICT, "KEY_UNDER_FILE"),
            Self::PayloadTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE"),
            Self::UnsupportedMethod(_) => (StatusCode::NOT_IMPLEMENTED, "NOT_IMPLEMENTED"),
            Self::ConfigInvalid { .. }
            | Self::ConfigNotFound(_)
            | Self::ConfigDirCreate { .. }
            | Self::Io { .. }
            | Self::Json(_)
            | Self::TomlParse(_)
            | Self::TomlSerialize(_)
            | Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = if self.is_client_error() {
            self.to_string()
        } else {
            match &self {
                Self::Io { source, .. } => {
                    tracing::error!(error = %self, source = %source, "storage failure")
                }
                _ => tracing::error!(error = %self, "internal server error"),
            }
            "An internal error occurred".to_string()
        };

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        if status == StatusCode::UNAUTHORIZED {
            return (status, [(header::WWW_AUTHENTICATE, "Bearer")], Json(body)).into_response();
        }
        (status, Json(body)).into_response()
    }
}
