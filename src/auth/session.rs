//! Session issuance and validation.
//!
//! A token is `{id}.{secret}`. Only the SHA-256 of the secret is stored, so a
//! database read never yields a usable token.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use super::{clock::Clock, error::SessionError};
use crate::{
    crypto::{constant_time_eq, generate_secure_token, hash_secret},
    store::{AuthStore, SessionRecord},
    tenant::Tenant,
};

pub const SESSION_TTL_SECONDS: i64 = 24 * 60 * 60;

/// A freshly issued session. `token` is returned to the caller exactly once.
#[derive(Clone, Debug)]
pub struct IssuedSession {
    pub id: String,
    pub user_id: String,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A validated session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub struct SessionManager<'a> {
    store: &'a dyn AuthStore,
    clock: &'a dyn Clock,
    ttl: Duration,
}

/// Split a token into `(id, secret)`; both halves must be non-empty.
fn split_token(token: &str) -> Option<(&str, &str)> {
    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(id), Some(secret), None) if !id.is_empty() && !secret.is_empty() => {
            Some((id, secret))
        }
        _ => None,
    }
}

impl<'a> SessionManager<'a> {
    #[must_use]
    pub fn new(store: &'a dyn AuthStore, clock: &'a dyn Clock, ttl_seconds: i64) -> Self {
        Self {
            store,
            clock,
            ttl: Duration::seconds(ttl_seconds),
        }
    }

    /// Issue a new session for `user_id`.
    ///
    /// # Errors
    /// Returns an error if randomness or the store fails.
    pub async fn create_session(&self, tenant: &Tenant, user_id: &str) -> Result<IssuedSession> {
        let id = generate_secure_token()?;
        let secret = generate_secure_token()?;
        let created_at = self.clock.now();
        let record = SessionRecord {
            id: id.clone(),
            user_id: user_id.to_string(),
            secret_hash: hash_secret(&secret),
            created_at,
        };
        self.store.insert_session(tenant, &record).await?;
        debug!(tenant = %tenant, session_id = %id, "Session created");
        Ok(IssuedSession {
            token: format!("{id}.{secret}"),
            id,
            user_id: user_id.to_string(),
            created_at,
            expires_at: created_at + self.ttl,
        })
    }

    /// Resolve a bearer token into a live session.
    ///
    /// Expired sessions are deleted on sight and reported as not found.
    ///
    /// # Errors
    /// Returns a typed [`SessionError`] describing why the token was rejected.
    pub async fn validate_session_token(
        &self,
        tenant: &Tenant,
        token: &str,
    ) -> Result<Session, SessionError> {
        let (id, secret) = split_token(token).ok_or(SessionError::InvalidFormat)?;
        let record = self
            .store
            .find_session(tenant, id)
            .await?
            .ok_or(SessionError::SessionNotFound)?;

        if !constant_time_eq(&hash_secret(secret), &record.secret_hash) {
            return Err(SessionError::InvalidSecret);
        }

        let expires_at = record.created_at + self.ttl;
        if self.clock.now() >= expires_at {
            self.store.delete_session(tenant, &record.id).await?;
            debug!(tenant = %tenant, session_id = %record.id, "Expired session removed");
            return Err(SessionError::SessionNotFound);
        }

        Ok(Session {
            id: record.id,
            user_id: record.user_id,
            created_at: record.created_at,
            expires_at,
        })
    }

    /// Delete a session by id. Missing sessions are not an error.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn delete_session(&self, tenant: &Tenant, session_id: &str) -> Result<bool> {
        self.store.delete_session(tenant, session_id).await
    }

    /// Validate `token`, delete it and issue a replacement for the same user.
    ///
    /// # Errors
    /// Returns the validation error for bad tokens, or a storage error.
    pub async fn refresh_session(
        &self,
        tenant: &Tenant,
        token: &str,
    ) -> Result<IssuedSession, SessionError> {
        let session = self.validate_session_token(tenant, token).await?;
        if !self.store.delete_session(tenant, &session.id).await? {
            // A concurrent refresh or logout already consumed it.
            return Err(SessionError::SessionNotFound);
        }
        Ok(self.create_session(tenant, &session.user_id).await?)
    }

    /// Delete every session belonging to `user_id`.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn delete_user_sessions(&self, tenant: &Tenant, user_id: &str) -> Result<u64> {
        self.store.delete_user_sessions(tenant, user_id).await
    }

    /// Bulk delete sessions older than the session lifetime.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn cleanup_expired_sessions(&self, tenant: &Tenant) -> Result<u64> {
        let cutoff = self.clock.now() - self.ttl;
        self.store
            .delete_sessions_created_by(tenant, cutoff)
            .await
    }
}
