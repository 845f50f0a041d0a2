//! Password signup.

use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
};
use std::sync::Arc;

use super::{
    types::{AuthResponse, SignupRequest},
    utils::{enforce_csrf, enforce_rate_limit, json_body},
};
use crate::{
    api::middleware::RequestContext,
    auth::{
        AuthError, AuthState,
        credentials::{self, SignupInput},
        rate_limit::RateLimitClass,
    },
};

/// Create a user, send the verification email and issue a session.
#[utoipa::path(
    post,
    path = "/auth/signup",
    request_body = SignupRequest,
    params(
        ("X-CSRF-Token" = Option<String>, Header, description = "CSRF token, alternative to `csrfToken`")
    ),
    responses(
        (status = 201, description = "User created and signed in", body = AuthResponse),
        (status = 400, description = "Invalid input", body = crate::api::error::ErrorResponse),
        (status = 403, description = "Invalid CSRF token", body = crate::api::error::ErrorResponse),
        (status = 409, description = "Email already registered", body = crate::api::error::ErrorResponse),
        (status = 429, description = "Rate limited", body = crate::api::error::ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn signup(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    context: Extension<RequestContext>,
    payload: Result<Json<SignupRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AuthResponse>), AuthError> {
    enforce_rate_limit(&auth_state, &context, RateLimitClass::Signup).await?;
    let request = json_body(payload)?;
    enforce_csrf(&auth_state, &context, &headers, request.csrf_token.as_deref()).await?;

    let created = credentials::signup(
        &auth_state,
        &context.tenant,
        SignupInput {
            email: request.email,
            password: request.password,
            first_name: request.first_name,
            last_name: request.last_name,
        },
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            success: true,
            user: (&created.user).into(),
            session: (&created.session).into(),
        }),
    ))
}
