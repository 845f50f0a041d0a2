//! Password reset request and confirmation.

use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::HeaderMap,
};
use std::sync::Arc;

use super::{
    types::{PasswordResetConfirmRequest, PasswordResetRequest, SuccessResponse},
    utils::{enforce_csrf, enforce_rate_limit, json_body},
};
use crate::{
    api::middleware::RequestContext,
    auth::{AuthError, AuthState, credentials, rate_limit::RateLimitClass},
};

const RESET_REQUESTED: &str = "If the email is registered, a reset link has been sent";

/// Request a reset link. The answer is identical for registered and unknown
/// addresses.
#[utoipa::path(
    post,
    path = "/auth/password-reset",
    request_body = PasswordResetRequest,
    responses(
        (status = 200, description = "Request accepted", body = SuccessResponse),
        (status = 400, description = "Malformed email", body = crate::api::error::ErrorResponse),
        (status = 429, description = "Rate limited", body = crate::api::error::ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn request_reset(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    context: Extension<RequestContext>,
    payload: Result<Json<PasswordResetRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, AuthError> {
    enforce_rate_limit(&auth_state, &context, RateLimitClass::PasswordReset).await?;
    let request = json_body(payload)?;
    enforce_csrf(&auth_state, &context, &headers, None).await?;
    credentials::request_password_reset(&auth_state, &context.tenant, &request.email).await?;
    Ok(Json(SuccessResponse::with_message(RESET_REQUESTED)))
}

/// Set a new password with a reset token. Ends every session of the user.
#[utoipa::path(
    post,
    path = "/auth/password-reset/confirm",
    request_body = PasswordResetConfirmRequest,
    responses(
        (status = 200, description = "Password changed", body = SuccessResponse),
        (status = 400, description = "Invalid or expired token, or weak password", body = crate::api::error::ErrorResponse),
        (status = 429, description = "Rate limited", body = crate::api::error::ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn confirm_reset(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    context: Extension<RequestContext>,
    payload: Result<Json<PasswordResetConfirmRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, AuthError> {
    enforce_rate_limit(&auth_state, &context, RateLimitClass::PasswordReset).await?;
    let request = json_body(payload)?;
    enforce_csrf(&auth_state, &context, &headers, None).await?;
    credentials::confirm_password_reset(
        &auth_state,
        &context.tenant,
        &request.token,
        &request.password,
    )
    .await?;
    Ok(Json(SuccessResponse::ok()))
}
