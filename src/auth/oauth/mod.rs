//! OAuth federation: authorization redirects, callback handling and account
//! linking.
//!
//! Flow per login:
//! 1. `authorize` mints a one-time state bound to the provider and the row's
//!    redirect URI and returns the provider URL.
//! 2. `callback` burns the state, exchanges the code, fetches user info and
//!    resolves the local user (linked account, same email, or new user).
//! 3. A session is issued for that user.
//!
//! Callback failures reach the client only as `OAuth authentication failed`;
//! the cause is logged.

use anyhow::anyhow;
use chrono::Duration;
use tracing::{info, warn};
use url::Url;

use super::{
    credentials::{AuthenticatedUser, normalize_email},
    error::AuthError,
    state::AuthState,
};
use crate::{
    crypto::{generate_secure_token, hash_secret},
    store::{
        InsertUserOutcome, OAuthAccountRecord, OAuthProviderRecord, OAuthStateRecord, OAuthTokens,
        UserRecord,
    },
    tenant::Tenant,
};

pub mod client;
pub mod provider;

use provider::{ConfiguredProvider, NormalizedUserInfo, build_authorization_url};

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("provider is not configured or disabled")]
    UnknownProvider,
    #[error("provider {0} has no endpoints configured")]
    MissingEndpoints(String),
    #[error("invalid provider endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("missing code or state")]
    MissingParameters,
    #[error("invalid_state")]
    InvalidState,
    #[error("token exchange failed: {0}")]
    TokenExchange(String),
    #[error("user info request failed: {0}")]
    UserInfo(String),
    #[error("user info is missing {0}")]
    MissingUserField(&'static str),
    #[error("refusing to link unverified provider email to an existing account")]
    UnverifiedEmail,
    #[error("storage failure: {0:#}")]
    Storage(anyhow::Error),
}

impl From<anyhow::Error> for OAuthError {
    fn from(err: anyhow::Error) -> Self {
        Self::Storage(err)
    }
}

pub struct OAuthFlow<'a> {
    state: &'a AuthState,
    http: &'a reqwest::Client,
}

impl<'a> OAuthFlow<'a> {
    #[must_use]
    pub fn new(state: &'a AuthState, http: &'a reqwest::Client) -> Self {
        Self { state, http }
    }

    async fn enabled_provider(
        &self,
        tenant: &Tenant,
        name: &str,
    ) -> Result<(OAuthProviderRecord, ConfiguredProvider), OAuthError> {
        let record = self
            .state
            .store()
            .find_oauth_provider(tenant, name)
            .await?
            .filter(|record| record.enabled)
            .ok_or(OAuthError::UnknownProvider)?;
        let provider = ConfiguredProvider::from_record(&record)?;
        Ok((record, provider))
    }

    /// Start a login with `provider_name` and return the URL to redirect to.
    ///
    /// # Errors
    /// `UnknownProvider` for missing or disabled rows, otherwise storage or
    /// configuration errors.
    pub async fn authorize(&self, tenant: &Tenant, provider_name: &str) -> Result<Url, AuthError> {
        let (record, provider) = match self.enabled_provider(tenant, provider_name).await {
            Ok(found) => found,
            Err(OAuthError::UnknownProvider) => return Err(AuthError::UnknownProvider),
            Err(OAuthError::Storage(err)) => return Err(AuthError::Storage(err)),
            Err(err) => {
                return Err(AuthError::Internal(anyhow!(
                    "oauth provider {provider_name} misconfigured: {err}"
                )));
            }
        };

        let state_token = generate_secure_token().map_err(AuthError::Internal)?;
        let url = build_authorization_url(&provider, &record, &state_token)
            .map_err(|err| AuthError::Internal(anyhow!(err.to_string())))?;
        self.state
            .store()
            .insert_oauth_state(
                tenant,
                &OAuthStateRecord {
                    state_hash: hash_secret(&state_token),
                    provider: record.name.clone(),
                    redirect_uri: record.redirect_uri.clone(),
                    created_at: self.state.clock().now(),
                },
            )
            .await?;
        Ok(url)
    }

    /// Complete a login started by [`OAuthFlow::authorize`].
    ///
    /// # Errors
    /// Always `AuthError::OAuthFailed`; the specific cause is logged.
    pub async fn callback(
        &self,
        tenant: &Tenant,
        provider_name: &str,
        code: &str,
        state: &str,
    ) -> Result<AuthenticatedUser, AuthError> {
        match self.try_callback(tenant, provider_name, code, state).await {
            Ok(authenticated) => Ok(authenticated),
            Err(err) => {
                warn!(
                    tenant = %tenant,
                    provider = provider_name,
                    "OAuth callback failed: {err}"
                );
                Err(AuthError::OAuthFailed)
            }
        }
    }

    async fn try_callback(
        &self,
        tenant: &Tenant,
        provider_name: &str,
        code: &str,
        state: &str,
    ) -> Result<AuthenticatedUser, OAuthError> {
        if code.is_empty() || state.is_empty() {
            return Err(OAuthError::MissingParameters);
        }
        let redirect_uri = self.consume_state(tenant, provider_name, state).await?;
        let (record, provider) = self.enabled_provider(tenant, provider_name).await?;
        let tokens = client::exchange_code(
            self.http,
            &provider,
            &record,
            &redirect_uri,
            code,
            self.state.clock().now(),
        )
        .await?;
        let info = client::fetch_user_info(self.http, &provider, &tokens.access_token).await?;
        let user = self
            .resolve_identity(tenant, provider_name, info, tokens)
            .await?;
        let session = self
            .state
            .sessions()
            .create_session(tenant, &user.id)
            .await?;
        Ok(AuthenticatedUser { user, session })
    }

    /// Burn the state row and return the redirect URI it was bound to.
    ///
    /// The row is deleted on any presentation, so a state cannot be replayed
    /// even against the wrong provider.
    async fn consume_state(
        &self,
        tenant: &Tenant,
        provider_name: &str,
        state: &str,
    ) -> Result<String, OAuthError> {
        let stored = self
            .state
            .store()
            .take_oauth_state(tenant, &hash_secret(state))
            .await?
            .ok_or(OAuthError::InvalidState)?;
        let ttl = Duration::seconds(self.state.config().oauth_state_ttl_seconds());
        if stored.provider != provider_name || self.state.clock().now() - stored.created_at >= ttl {
            return Err(OAuthError::InvalidState);
        }
        Ok(stored.redirect_uri)
    }

    async fn resolve_identity(
        &self,
        tenant: &Tenant,
        provider_name: &str,
        info: NormalizedUserInfo,
        tokens: OAuthTokens,
    ) -> Result<UserRecord, OAuthError> {
        let store = self.state.store();

        if let Some(account) = store
            .find_oauth_account(tenant, provider_name, &info.provider_user_id)
            .await?
        {
            store
                .update_oauth_tokens(tenant, &account.id, &tokens)
                .await?;
            return store
                .find_user_by_id(tenant, &account.user_id)
                .await?
                .ok_or_else(|| {
                    OAuthError::Storage(anyhow!("linked user {} is missing", account.user_id))
                });
        }

        let email = normalize_email(&info.email);
        let user = match store.find_user_by_email(tenant, &email).await? {
            Some(existing) => {
                if !info.email_verified {
                    return Err(OAuthError::UnverifiedEmail);
                }
                info!(tenant = %tenant, user_id = %existing.id, provider = provider_name, "Linking OAuth account to existing user");
                existing
            }
            None => self.create_user(tenant, &email, &info).await?,
        };

        let account = OAuthAccountRecord {
            id: generate_secure_token()?,
            user_id: user.id.clone(),
            provider: provider_name.to_string(),
            provider_user_id: info.provider_user_id,
            tokens,
            created_at: self.state.clock().now(),
        };
        store.insert_oauth_account(tenant, &account).await?;
        Ok(user)
    }

    async fn create_user(
        &self,
        tenant: &Tenant,
        email: &str,
        info: &NormalizedUserInfo,
    ) -> Result<UserRecord, OAuthError> {
        let user = UserRecord {
            id: generate_secure_token()?,
            email: email.to_string(),
            first_name: info.first_name.clone(),
            last_name: info.last_name.clone(),
            password: None,
            email_verified: info.email_verified,
            failed_login_attempts: 0,
            locked_until: None,
            created_at: self.state.clock().now(),
        };
        match self.state.store().insert_user(tenant, &user).await? {
            InsertUserOutcome::Created => {
                info!(tenant = %tenant, user_id = %user.id, "User created from OAuth login");
                Ok(user)
            }
            // Lost a race with a concurrent signup for the same email.
            InsertUserOutcome::Conflict => Err(OAuthError::Storage(anyhow!(
                "user with this email was created concurrently"
            ))),
        }
    }
}
