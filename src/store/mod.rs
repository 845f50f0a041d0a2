//! Persistence boundary for every tenant-scoped table.
//!
//! The auth engine only talks to [`AuthStore`]. Each method takes the
//! resolved [`Tenant`] explicitly, so there is no ambient "current tenant"
//! anywhere in the process. Writes that must be race-free are expressed as a
//! single conditional statement (atomic increment, delete-returning,
//! compare-and-swap) rather than read-then-write sequences.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;

use crate::{crypto::PasswordHash, tenant::Tenant};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// A user row. `password` is `None` for accounts created through OAuth.
#[derive(Clone, Debug)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: Option<PasswordHash>,
    pub email_verified: bool,
    pub failed_login_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    #[must_use]
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertUserOutcome {
    Created,
    /// The email is already registered in this tenant.
    Conflict,
}

#[derive(Clone, Debug)]
pub struct SessionRecord {
    pub id: String,
    pub user_id: String,
    pub secret_hash: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// Identity of a token bucket. The refill interval is part of the key so
/// reconfiguring a class starts fresh buckets instead of reinterpreting old ones.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BucketKey {
    pub operation: String,
    pub refill_interval_seconds: i64,
    pub client_key: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BucketState {
    pub count: i64,
    pub refilled_at_ms: i64,
}

/// The two kinds of single-use, user-bound tokens delivered by email.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UserTokenKind {
    PasswordReset,
    EmailVerification,
}

impl UserTokenKind {
    pub const ALL: [Self; 2] = [Self::PasswordReset, Self::EmailVerification];

    #[must_use]
    pub fn table(self) -> &'static str {
        match self {
            Self::PasswordReset => "password_reset_tokens",
            Self::EmailVerification => "email_verification_tokens",
        }
    }
}

#[derive(Clone, Debug)]
pub struct UserTokenRecord {
    pub token_hash: Vec<u8>,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A tenant's configuration row for one OAuth provider.
///
/// Endpoint overrides are optional; when absent the well-known template for
/// `name` is used.
#[derive(Clone, Debug)]
pub struct OAuthProviderRecord {
    pub name: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_uri: String,
    pub scope: Option<String>,
    pub enabled: bool,
    pub authorize_url: Option<String>,
    pub token_url: Option<String>,
    pub user_info_url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct OAuthTokens {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug)]
pub struct OAuthAccountRecord {
    pub id: String,
    pub user_id: String,
    pub provider: String,
    pub provider_user_id: String,
    pub tokens: OAuthTokens,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OAuthStateRecord {
    pub state_hash: Vec<u8>,
    pub provider: String,
    pub redirect_uri: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait AuthStore: Send + Sync {
    /// Create the tenant's table set if it does not exist yet.
    async fn provision_tenant(&self, tenant: &Tenant) -> Result<()>;

    async fn ping(&self) -> Result<()>;

    async fn insert_user(&self, tenant: &Tenant, user: &UserRecord) -> Result<InsertUserOutcome>;

    async fn find_user_by_email(&self, tenant: &Tenant, email: &str) -> Result<Option<UserRecord>>;

    async fn find_user_by_id(&self, tenant: &Tenant, user_id: &str) -> Result<Option<UserRecord>>;

    /// Atomically increment the failed-login counter and return the new value.
    async fn record_failed_login(&self, tenant: &Tenant, user_id: &str) -> Result<u32>;

    async fn lock_user(&self, tenant: &Tenant, user_id: &str, until: DateTime<Utc>) -> Result<()>;

    /// Clear the failed-login counter and any lock.
    async fn reset_failed_logins(&self, tenant: &Tenant, user_id: &str) -> Result<()>;

    /// Replace the password hash. Also clears lockout state.
    async fn update_password(
        &self,
        tenant: &Tenant,
        user_id: &str,
        password: &PasswordHash,
    ) -> Result<()>;

    async fn mark_email_verified(&self, tenant: &Tenant, user_id: &str) -> Result<()>;

    async fn insert_session(&self, tenant: &Tenant, session: &SessionRecord) -> Result<()>;

    async fn find_session(&self, tenant: &Tenant, session_id: &str)
    -> Result<Option<SessionRecord>>;

    async fn delete_session(&self, tenant: &Tenant, session_id: &str) -> Result<bool>;

    async fn delete_user_sessions(&self, tenant: &Tenant, user_id: &str) -> Result<u64>;

    /// Delete rows created at or before `cutoff`.
    async fn delete_sessions_created_by(
        &self,
        tenant: &Tenant,
        cutoff: DateTime<Utc>,
    ) -> Result<u64>;

    async fn insert_csrf_token(
        &self,
        tenant: &Tenant,
        token_hash: &[u8],
        created_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Delete the token if it was created at or after `not_before`.
    ///
    /// Returns `true` only for the single caller whose delete matched a row.
    async fn consume_csrf_token(
        &self,
        tenant: &Tenant,
        token_hash: &[u8],
        not_before: DateTime<Utc>,
    ) -> Result<bool>;

    async fn delete_csrf_tokens_created_before(
        &self,
        tenant: &Tenant,
        cutoff: DateTime<Utc>,
    ) -> Result<u64>;

    async fn load_bucket(&self, tenant: &Tenant, key: &BucketKey) -> Result<Option<BucketState>>;

    /// Insert a new bucket. Returns `false` if another writer created it first.
    async fn insert_bucket(&self, tenant: &Tenant, key: &BucketKey, state: BucketState)
    -> Result<bool>;

    /// Replace `expected` with `next`. Returns `false` when the stored state
    /// no longer equals `expected`.
    async fn swap_bucket(
        &self,
        tenant: &Tenant,
        key: &BucketKey,
        expected: BucketState,
        next: BucketState,
    ) -> Result<bool>;

    async fn delete_buckets_refilled_before(&self, tenant: &Tenant, cutoff_ms: i64) -> Result<u64>;

    async fn insert_user_token(
        &self,
        tenant: &Tenant,
        kind: UserTokenKind,
        record: &UserTokenRecord,
    ) -> Result<()>;

    /// Delete an unexpired token and return the user it was bound to.
    async fn consume_user_token(
        &self,
        tenant: &Tenant,
        kind: UserTokenKind,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<String>>;

    /// Delete tokens whose `expires_at` is at or before `cutoff`.
    async fn delete_user_tokens_expired_by(
        &self,
        tenant: &Tenant,
        kind: UserTokenKind,
        cutoff: DateTime<Utc>,
    ) -> Result<u64>;

    async fn find_oauth_provider(
        &self,
        tenant: &Tenant,
        name: &str,
    ) -> Result<Option<OAuthProviderRecord>>;

    async fn upsert_oauth_provider(
        &self,
        tenant: &Tenant,
        provider: &OAuthProviderRecord,
    ) -> Result<()>;

    async fn find_oauth_account(
        &self,
        tenant: &Tenant,
        provider: &str,
        provider_user_id: &str,
    ) -> Result<Option<OAuthAccountRecord>>;

    async fn insert_oauth_account(&self, tenant: &Tenant, account: &OAuthAccountRecord)
    -> Result<()>;

    async fn update_oauth_tokens(
        &self,
        tenant: &Tenant,
        account_id: &str,
        tokens: &OAuthTokens,
    ) -> Result<()>;

    async fn insert_oauth_state(&self, tenant: &Tenant, state: &OAuthStateRecord) -> Result<()>;

    /// Delete and return a state row. Any presentation burns the state.
    async fn take_oauth_state(
        &self,
        tenant: &Tenant,
        state_hash: &[u8],
    ) -> Result<Option<OAuthStateRecord>>;

    /// Delete rows created at or before `cutoff`.
    async fn delete_oauth_states_created_by(
        &self,
        tenant: &Tenant,
        cutoff: DateTime<Utc>,
    ) -> Result<u64>;

    /// Claim the global tracking row for `job` if its last run is at least
    /// `min_interval` old. Exactly one concurrent caller wins.
    async fn claim_maintenance_run(
        &self,
        job: &str,
        now: DateTime<Utc>,
        min_interval: chrono::Duration,
    ) -> Result<bool>;
}
