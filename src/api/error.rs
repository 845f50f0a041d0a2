//! Uniform JSON error envelope.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use utoipa::ToSchema;

use crate::auth::AuthError;

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<i64>,
}

impl ErrorResponse {
    pub fn from_error(err: &AuthError) -> Self {
        let (remaining_attempts, retry_after_seconds) = match err {
            AuthError::InvalidCredentials { remaining_attempts } => (*remaining_attempts, None),
            AuthError::AccountLocked {
                retry_after_seconds,
            }
            | AuthError::RateLimited {
                retry_after_seconds,
            } => (None, Some(*retry_after_seconds)),
            _ => (None, None),
        };
        Self {
            success: false,
            error: err.public_message(),
            status: err.status(),
            code: Some(err.code().to_string()),
            remaining_attempts,
            retry_after_seconds,
        }
    }

    /// Envelope for router-level failures that never reach a handler.
    pub fn plain(status: StatusCode, error: &str) -> Self {
        Self {
            success: false,
            error: error.to_string(),
            status: status.as_u16(),
            code: None,
            remaining_attempts: None,
            retry_after_seconds: None,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if let Some(cause) = self.cause() {
            if status == StatusCode::SERVICE_UNAVAILABLE {
                warn!(code = self.code(), "Request failed on storage: {cause:#}");
            } else {
                error!(code = self.code(), "Request failed: {cause:#}");
            }
        }

        let body = ErrorResponse::from_error(&self);
        let mut response = (status, Json(body)).into_response();
        if let AuthError::RateLimited {
            retry_after_seconds,
        } = self
            && let Ok(value) = HeaderValue::from_str(&retry_after_seconds.to_string())
        {
            response.headers_mut().insert(RETRY_AFTER, value);
        }
        response
    }
}

pub async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse::plain(StatusCode::NOT_FOUND, "Not found")),
    )
        .into_response()
}

pub async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(ErrorResponse::plain(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed",
        )),
    )
        .into_response()
}
