//! Password login.

use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::HeaderMap,
};
use std::sync::Arc;

use super::{
    types::{AuthResponse, LoginRequest},
    utils::{enforce_csrf, enforce_rate_limit, json_body},
};
use crate::{
    api::middleware::RequestContext,
    auth::{AuthError, AuthState, credentials, rate_limit::RateLimitClass},
};

/// Authenticate with email and password.
///
/// Failures report the attempts left before the next lockout tier, or the
/// lock just applied.
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    params(
        ("X-CSRF-Token" = Option<String>, Header, description = "CSRF token, alternative to `csrfToken`")
    ),
    responses(
        (status = 200, description = "Signed in", body = AuthResponse),
        (status = 400, description = "Missing email or password", body = crate::api::error::ErrorResponse),
        (status = 401, description = "Invalid credentials", body = crate::api::error::ErrorResponse),
        (status = 423, description = "Account locked", body = crate::api::error::ErrorResponse),
        (status = 429, description = "Rate limited", body = crate::api::error::ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    context: Extension<RequestContext>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, AuthError> {
    enforce_rate_limit(&auth_state, &context, RateLimitClass::Login).await?;
    let request = json_body(payload)?;
    enforce_csrf(&auth_state, &context, &headers, request.csrf_token.as_deref()).await?;

    let authenticated =
        credentials::login(&auth_state, &context.tenant, &request.email, &request.password).await?;
    Ok(Json(AuthResponse {
        success: true,
        user: (&authenticated.user).into(),
        session: (&authenticated.session).into(),
    }))
}
