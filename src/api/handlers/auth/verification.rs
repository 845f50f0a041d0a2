//! Email verification endpoint.

use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
};
use std::sync::Arc;

use super::{
    types::{SuccessResponse, VerifyEmailRequest},
    utils::{enforce_rate_limit, json_body},
};
use crate::{
    api::middleware::RequestContext,
    auth::{AuthError, AuthState, credentials, rate_limit::RateLimitClass},
};

/// Consume the token from a verification link.
#[utoipa::path(
    post,
    path = "/auth/verify-email",
    request_body = VerifyEmailRequest,
    responses(
        (status = 200, description = "Email verified", body = SuccessResponse),
        (status = 400, description = "Invalid or expired token", body = crate::api::error::ErrorResponse),
        (status = 429, description = "Rate limited", body = crate::api::error::ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn verify_email(
    auth_state: Extension<Arc<AuthState>>,
    context: Extension<RequestContext>,
    payload: Result<Json<VerifyEmailRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, AuthError> {
    // Limit before touching the token table to blunt guessing.
    enforce_rate_limit(&auth_state, &context, RateLimitClass::Api).await?;
    let request = json_body(payload)?;
    credentials::verify_email(&auth_state, &context.tenant, &request.token).await?;
    Ok(Json(SuccessResponse::ok()))
}
