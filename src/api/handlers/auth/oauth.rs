//! OAuth redirect and callback endpoints.

use axum::{
    Json,
    extract::{Extension, Path, Query},
    response::Redirect,
};
use std::sync::Arc;
use tracing::warn;

use super::{
    types::{AuthResponse, OAuthAuthorizeQuery, OAuthCallbackQuery},
    utils::enforce_rate_limit,
};
use crate::{
    api::middleware::RequestContext,
    auth::{AuthError, AuthState, rate_limit::RateLimitClass},
};

/// Redirect the browser to the provider's consent page.
#[utoipa::path(
    get,
    path = "/auth/oauth/authorize",
    params(OAuthAuthorizeQuery),
    responses(
        (status = 303, description = "Redirect to the provider"),
        (status = 404, description = "Provider not configured or disabled", body = crate::api::error::ErrorResponse),
        (status = 429, description = "Rate limited", body = crate::api::error::ErrorResponse)
    ),
    tag = "oauth"
)]
pub async fn authorize(
    auth_state: Extension<Arc<AuthState>>,
    context: Extension<RequestContext>,
    Query(query): Query<OAuthAuthorizeQuery>,
) -> Result<Redirect, AuthError> {
    enforce_rate_limit(&auth_state, &context, RateLimitClass::Api).await?;
    let provider = query.provider.trim().to_lowercase();
    if provider.is_empty() {
        return Err(AuthError::Validation("provider is required".to_string()));
    }
    let url = auth_state
        .oauth()
        .authorize(&context.tenant, &provider)
        .await?;
    Ok(Redirect::to(url.as_str()))
}

/// Finish the provider round trip and sign the user in.
#[utoipa::path(
    get,
    path = "/auth/oauth/{provider}/callback",
    params(
        ("provider" = String, Path, description = "Provider name"),
        OAuthCallbackQuery
    ),
    responses(
        (status = 200, description = "Signed in", body = AuthResponse),
        (status = 401, description = "OAuth authentication failed", body = crate::api::error::ErrorResponse),
        (status = 429, description = "Rate limited", body = crate::api::error::ErrorResponse)
    ),
    tag = "oauth"
)]
pub async fn callback(
    auth_state: Extension<Arc<AuthState>>,
    context: Extension<RequestContext>,
    Path(provider): Path<String>,
    Query(query): Query<OAuthCallbackQuery>,
) -> Result<Json<AuthResponse>, AuthError> {
    enforce_rate_limit(&auth_state, &context, RateLimitClass::Api).await?;
    if let Some(error) = query.error.as_deref() {
        warn!(tenant = %context.tenant, provider = %provider, "Provider returned error: {error}");
        return Err(AuthError::OAuthFailed);
    }
    let authenticated = auth_state
        .oauth()
        .callback(
            &context.tenant,
            &provider.to_lowercase(),
            query.code.as_deref().unwrap_or_default(),
            query.state.as_deref().unwrap_or_default(),
        )
        .await?;
    Ok(Json(AuthResponse {
        success: true,
        user: (&authenticated.user).into(),
        session: (&authenticated.session).into(),
    }))
}
