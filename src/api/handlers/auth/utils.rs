//! Shared gates for auth handlers: body parsing, rate limits, CSRF and
//! bearer authentication.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::{HeaderMap, header::AUTHORIZATION},
};
use tracing::debug;

use crate::{
    api::middleware::RequestContext,
    auth::{
        AuthError, AuthState,
        rate_limit::{RateLimitClass, RateLimitDecision},
        session::Session,
    },
};

pub(crate) const CSRF_HEADER: &str = "x-csrf-token";

/// Unwrap a JSON body or report a validation error.
pub(super) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AuthError> {
    match payload {
        Ok(Json(body)) => Ok(body),
        Err(rejection) => {
            debug!("Rejected request body: {rejection}");
            Err(AuthError::Validation("Invalid request body".to_string()))
        }
    }
}

pub(super) async fn enforce_rate_limit(
    state: &AuthState,
    context: &RequestContext,
    class: RateLimitClass,
) -> Result<(), AuthError> {
    match state
        .rate_limiter()
        .consume(&context.tenant, class, &context.client_key, 1)
        .await
    {
        RateLimitDecision::Allowed => Ok(()),
        RateLimitDecision::Limited {
            retry_after_seconds,
        } => Err(AuthError::RateLimited {
            retry_after_seconds,
        }),
    }
}

/// Check a CSRF token from the body or the `X-CSRF-Token` header.
///
/// A presented token must be valid. An absent token is only an error when the
/// deployment requires CSRF tokens.
pub(super) async fn enforce_csrf(
    state: &AuthState,
    context: &RequestContext,
    headers: &HeaderMap,
    body_token: Option<&str>,
) -> Result<(), AuthError> {
    let token = body_token
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .or_else(|| {
            headers
                .get(CSRF_HEADER)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|token| !token.is_empty())
        });
    let Some(token) = token else {
        return if state.config().require_csrf() {
            Err(AuthError::InvalidCsrfToken)
        } else {
            Ok(())
        };
    };
    if state.csrf().validate(&context.tenant, token).await? {
        Ok(())
    } else {
        Err(AuthError::InvalidCsrfToken)
    }
}

pub(super) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() { None } else { Some(token) }
}

/// Resolve the bearer token into a live session.
pub(super) async fn authenticate(
    state: &AuthState,
    context: &RequestContext,
    headers: &HeaderMap,
) -> Result<Session, AuthError> {
    let token = bearer_token(headers).ok_or(AuthError::MissingSession)?;
    Ok(state
        .sessions()
        .validate_session_token(&context.tenant, token)
        .await?)
}
