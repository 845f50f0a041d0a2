//! One-time anti-forgery tokens.

use anyhow::Result;
use chrono::Duration;

use super::clock::Clock;
use crate::{
    crypto::{generate_secure_token, hash_secret},
    store::AuthStore,
    tenant::Tenant,
};

pub const CSRF_TTL_SECONDS: i64 = 60 * 60;

pub struct CsrfManager<'a> {
    store: &'a dyn AuthStore,
    clock: &'a dyn Clock,
    ttl: Duration,
}

impl<'a> CsrfManager<'a> {
    #[must_use]
    pub fn new(store: &'a dyn AuthStore, clock: &'a dyn Clock, ttl_seconds: i64) -> Self {
        Self {
            store,
            clock,
            ttl: Duration::seconds(ttl_seconds),
        }
    }

    /// Mint a token and store its hash.
    ///
    /// # Errors
    /// Returns an error if randomness or the store fails.
    pub async fn generate(&self, tenant: &Tenant) -> Result<String> {
        let token = generate_secure_token()?;
        self.store
            .insert_csrf_token(tenant, &hash_secret(&token), self.clock.now())
            .await?;
        Ok(token)
    }

    /// Consume `token`. The delete is the check, so at most one caller wins.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn validate(&self, tenant: &Tenant, token: &str) -> Result<bool> {
        if token.is_empty() {
            return Ok(false);
        }
        let not_before = self.clock.now() - self.ttl;
        self.store
            .consume_csrf_token(tenant, &hash_secret(token), not_before)
            .await
    }

    /// Remove tokens that expired unused.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn cleanup(&self, tenant: &Tenant) -> Result<u64> {
        let cutoff = self.clock.now() - self.ttl;
        self.store
            .delete_csrf_tokens_created_before(tenant, cutoff)
            .await
    }
}
