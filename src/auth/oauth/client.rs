//! Calls to the provider's token and user-info endpoints.
//!
//! The client carries a bounded timeout. Nothing here retries: authorization
//! codes are single-use, so an ambiguous failure is final.

use chrono::{DateTime, Duration, Utc};
use reqwest::header::ACCEPT;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use super::{
    OAuthError,
    provider::{NormalizedUserInfo, OAuthProvider},
};
use crate::store::{OAuthProviderRecord, OAuthTokens};

const MAX_LOGGED_BODY: usize = 256;

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_LOGGED_BODY) {
        Some((index, _)) => &body[..index],
        None => body,
    }
}

/// Exchange an authorization code for tokens.
///
/// # Errors
/// Returns `OAuthError::TokenExchange` for transport errors, non-2xx answers,
/// error documents or responses without an access token.
pub async fn exchange_code(
    http: &reqwest::Client,
    provider: &dyn OAuthProvider,
    record: &OAuthProviderRecord,
    redirect_uri: &str,
    code: &str,
    now: DateTime<Utc>,
) -> Result<OAuthTokens, OAuthError> {
    let form = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", redirect_uri),
        ("client_id", record.client_id.as_str()),
        ("client_secret", record.client_secret.expose_secret()),
    ];
    let response = http
        .post(provider.token_url())
        .header(ACCEPT, "application/json")
        .form(&form)
        .send()
        .await
        .map_err(|err| OAuthError::TokenExchange(format!("request failed: {err}")))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|err| OAuthError::TokenExchange(format!("failed to read body: {err}")))?;
    if !status.is_success() {
        return Err(OAuthError::TokenExchange(format!(
            "status {status}: {}",
            truncate(&body)
        )));
    }

    let document: Value = serde_json::from_str(&body)
        .map_err(|err| OAuthError::TokenExchange(format!("invalid JSON: {err}")))?;
    if let Some(error) = document.get("error") {
        return Err(OAuthError::TokenExchange(format!("provider error: {error}")));
    }
    let access_token = document
        .get("access_token")
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| OAuthError::TokenExchange("response has no access_token".to_string()))?;

    Ok(OAuthTokens {
        access_token: SecretString::from(access_token.to_string()),
        refresh_token: document
            .get("refresh_token")
            .and_then(Value::as_str)
            .map(|token| SecretString::from(token.to_string())),
        expires_at: document
            .get("expires_in")
            .and_then(Value::as_i64)
            .map(|seconds| now + Duration::seconds(seconds)),
    })
}

/// Fetch and normalize the user-info document.
///
/// # Errors
/// Returns `OAuthError::UserInfo` for transport or status failures, or the
/// normalizer's error for incomplete documents.
pub async fn fetch_user_info(
    http: &reqwest::Client,
    provider: &dyn OAuthProvider,
    access_token: &SecretString,
) -> Result<NormalizedUserInfo, OAuthError> {
    let response = http
        .get(provider.user_info_url())
        .header(ACCEPT, "application/json")
        .bearer_auth(access_token.expose_secret())
        .send()
        .await
        .map_err(|err| OAuthError::UserInfo(format!("request failed: {err}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(OAuthError::UserInfo(format!(
            "status {status}: {}",
            truncate(&body)
        )));
    }
    let document: Value = response
        .json()
        .await
        .map_err(|err| OAuthError::UserInfo(format!("invalid JSON: {err}")))?;
    provider.normalize_user_info(&document)
}
