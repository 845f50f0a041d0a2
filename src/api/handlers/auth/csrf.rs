use axum::{Json, extract::Extension};
use std::sync::Arc;

use super::{types::CsrfTokenResponse, utils::enforce_rate_limit};
use crate::{
    api::middleware::RequestContext,
    auth::{AuthError, AuthState, rate_limit::RateLimitClass},
};

/// Mint a one-time CSRF token valid for one hour.
#[utoipa::path(
    get,
    path = "/auth/csrf-token",
    responses(
        (status = 200, description = "Token issued", body = CsrfTokenResponse),
        (status = 429, description = "Rate limited", body = crate::api::error::ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn csrf_token(
    auth_state: Extension<Arc<AuthState>>,
    context: Extension<RequestContext>,
) -> Result<Json<CsrfTokenResponse>, AuthError> {
    enforce_rate_limit(&auth_state, &context, RateLimitClass::Api).await?;
    let csrf_token = auth_state.csrf().generate(&context.tenant).await?;
    Ok(Json(CsrfTokenResponse {
        success: true,
        csrf_token,
    }))
}
