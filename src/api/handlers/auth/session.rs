//! Bearer session endpoints.

use axum::{Json, extract::Extension, http::HeaderMap};
use std::sync::Arc;
use tracing::debug;

use super::{
    types::{AuthResponse, RefreshResponse, SessionResponse, SuccessResponse},
    utils::{authenticate, bearer_token, enforce_rate_limit},
};
use crate::{
    api::middleware::RequestContext,
    auth::{AuthError, AuthState, credentials, rate_limit::RateLimitClass},
};

#[utoipa::path(
    get,
    path = "/auth/session",
    params(
        ("Authorization" = String, Header, description = "Bearer session token")
    ),
    responses(
        (status = 200, description = "Session is active", body = AuthResponse),
        (status = 401, description = "Missing, invalid or expired session", body = crate::api::error::ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn session(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    context: Extension<RequestContext>,
) -> Result<Json<AuthResponse>, AuthError> {
    enforce_rate_limit(&auth_state, &context, RateLimitClass::Session).await?;
    let session = authenticate(&auth_state, &context, &headers).await?;
    let user = credentials::load_user(&auth_state, &context.tenant, &session.user_id).await?;
    Ok(Json(AuthResponse {
        success: true,
        user: (&user).into(),
        session: SessionResponse::from(&session),
    }))
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    params(
        ("Authorization" = String, Header, description = "Bearer session token")
    ),
    responses(
        (status = 200, description = "Session deleted", body = SuccessResponse),
        (status = 401, description = "Missing, invalid or expired session", body = crate::api::error::ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    context: Extension<RequestContext>,
) -> Result<Json<SuccessResponse>, AuthError> {
    enforce_rate_limit(&auth_state, &context, RateLimitClass::Session).await?;
    let session = authenticate(&auth_state, &context, &headers).await?;
    if !auth_state
        .sessions()
        .delete_session(&context.tenant, &session.id)
        .await?
    {
        debug!(tenant = %context.tenant, session_id = %session.id, "Session already gone at logout");
    }
    Ok(Json(SuccessResponse::ok()))
}

/// Replace the presented session with a new one for the same user.
#[utoipa::path(
    post,
    path = "/auth/refresh",
    params(
        ("Authorization" = String, Header, description = "Bearer session token")
    ),
    responses(
        (status = 200, description = "New session issued", body = RefreshResponse),
        (status = 401, description = "Missing, invalid or expired session", body = crate::api::error::ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn refresh(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    context: Extension<RequestContext>,
) -> Result<Json<RefreshResponse>, AuthError> {
    enforce_rate_limit(&auth_state, &context, RateLimitClass::Session).await?;
    let token = bearer_token(&headers).ok_or(AuthError::MissingSession)?;
    let issued = auth_state
        .sessions()
        .refresh_session(&context.tenant, token)
        .await?;
    Ok(Json(RefreshResponse {
        success: true,
        session: (&issued).into(),
    }))
}
