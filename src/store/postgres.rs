//! Postgres-backed [`AuthStore`].
//!
//! Each tenant owns a prefixed table set created from `sql/tenant.sql`. Table
//! names are interpolated from a validated [`Tenant`], never from request
//! input; every value is bound as a parameter.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::Instrument;

use super::{
    AuthStore, BucketKey, BucketState, InsertUserOutcome, OAuthAccountRecord, OAuthProviderRecord,
    OAuthStateRecord, OAuthTokens, SessionRecord, UserRecord, UserTokenKind, UserTokenRecord,
};
use crate::{crypto::PasswordHash, tenant::Tenant};

const TENANT_DDL: &str = include_str!("../../sql/tenant.sql");
const GLOBAL_DDL: &str = include_str!("../../sql/global.sql");
const TENANT_PLACEHOLDER: &str = "__TENANT__";

const USER_COLUMNS: &str = "id, email, first_name, last_name, password_hash, password_salt, \
     email_verified, failed_login_attempts, locked_until, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

fn db_span(operation: &'static str, statement: &str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

/// Returns true when a SQLx error is a Postgres unique constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}

impl PgStore {
    /// Wrap an existing pool and make sure the global tables exist.
    ///
    /// # Errors
    /// Returns an error if the global DDL cannot be applied.
    pub async fn new(pool: PgPool) -> Result<Self> {
        sqlx::raw_sql(GLOBAL_DDL)
            .execute(&pool)
            .instrument(db_span("CREATE", GLOBAL_DDL))
            .await
            .context("failed to create global tables")?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn user_from_row(row: &PgRow) -> Result<UserRecord> {
    let hash: Option<String> = row.try_get("password_hash")?;
    let salt: Option<String> = row.try_get("password_salt")?;
    let attempts: i32 = row.try_get("failed_login_attempts")?;
    Ok(UserRecord {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        password: hash
            .zip(salt)
            .map(|(hash, salt)| PasswordHash { hash, salt }),
        email_verified: row.try_get("email_verified")?,
        failed_login_attempts: u32::try_from(attempts).unwrap_or_default(),
        locked_until: row.try_get("locked_until")?,
        created_at: row.try_get("created_at")?,
    })
}

fn session_from_row(row: &PgRow) -> Result<SessionRecord> {
    Ok(SessionRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        secret_hash: row.try_get("secret_hash")?,
        created_at: row.try_get("created_at")?,
    })
}

fn provider_from_row(row: &PgRow) -> Result<OAuthProviderRecord> {
    let client_secret: String = row.try_get("client_secret")?;
    Ok(OAuthProviderRecord {
        name: row.try_get("name")?,
        client_id: row.try_get("client_id")?,
        client_secret: SecretString::from(client_secret),
        redirect_uri: row.try_get("redirect_uri")?,
        scope: row.try_get("scope")?,
        enabled: row.try_get("enabled")?,
        authorize_url: row.try_get("authorize_url")?,
        token_url: row.try_get("token_url")?,
        user_info_url: row.try_get("user_info_url")?,
    })
}

fn account_from_row(row: &PgRow) -> Result<OAuthAccountRecord> {
    let access_token: String = row.try_get("access_token")?;
    let refresh_token: Option<String> = row.try_get("refresh_token")?;
    Ok(OAuthAccountRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        provider: row.try_get("provider")?,
        provider_user_id: row.try_get("provider_user_id")?,
        tokens: OAuthTokens {
            access_token: SecretString::from(access_token),
            refresh_token: refresh_token.map(SecretString::from),
            expires_at: row.try_get("expires_at")?,
        },
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl AuthStore for PgStore {
    async fn provision_tenant(&self, tenant: &Tenant) -> Result<()> {
        let ddl = TENANT_DDL.replace(TENANT_PLACEHOLDER, tenant.as_str());
        sqlx::raw_sql(&ddl)
            .execute(&self.pool)
            .instrument(db_span("CREATE", &ddl))
            .await
            .with_context(|| format!("failed to provision tenant {tenant}"))?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let query = "SELECT 1";
        sqlx::query(query)
            .execute(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("database ping failed")?;
        Ok(())
    }

    async fn insert_user(&self, tenant: &Tenant, user: &UserRecord) -> Result<InsertUserOutcome> {
        let query = format!(
            "INSERT INTO {} ({USER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            tenant.table("users")
        );
        let (hash, salt) = user
            .password
            .as_ref()
            .map(|p| (p.hash.as_str(), p.salt.as_str()))
            .unzip();
        let result = sqlx::query(&query)
            .bind(&user.id)
            .bind(&user.email)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(hash)
            .bind(salt)
            .bind(user.email_verified)
            .bind(i32::try_from(user.failed_login_attempts).unwrap_or(i32::MAX))
            .bind(user.locked_until)
            .bind(user.created_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", &query))
            .await;
        match result {
            Ok(_) => Ok(InsertUserOutcome::Created),
            Err(err) if is_unique_violation(&err) => Ok(InsertUserOutcome::Conflict),
            Err(err) => Err(err).context("failed to insert user"),
        }
    }

    async fn find_user_by_email(&self, tenant: &Tenant, email: &str) -> Result<Option<UserRecord>> {
        let query = format!(
            "SELECT {USER_COLUMNS} FROM {} WHERE email = $1",
            tenant.table("users")
        );
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup user by email")?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_user_by_id(&self, tenant: &Tenant, user_id: &str) -> Result<Option<UserRecord>> {
        let query = format!(
            "SELECT {USER_COLUMNS} FROM {} WHERE id = $1",
            tenant.table("users")
        );
        let row = sqlx::query(&query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup user by id")?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn record_failed_login(&self, tenant: &Tenant, user_id: &str) -> Result<u32> {
        let query = format!(
            "UPDATE {} SET failed_login_attempts = failed_login_attempts + 1 \
             WHERE id = $1 RETURNING failed_login_attempts",
            tenant.table("users")
        );
        let row = sqlx::query(&query)
            .bind(user_id)
            .fetch_one(&self.pool)
            .instrument(db_span("UPDATE", &query))
            .await
            .context("failed to record failed login")?;
        let attempts: i32 = row.try_get("failed_login_attempts")?;
        Ok(u32::try_from(attempts).unwrap_or_default())
    }

    async fn lock_user(&self, tenant: &Tenant, user_id: &str, until: DateTime<Utc>) -> Result<()> {
        let query = format!(
            "UPDATE {} SET locked_until = GREATEST(COALESCE(locked_until, $2), $2) WHERE id = $1",
            tenant.table("users")
        );
        sqlx::query(&query)
            .bind(user_id)
            .bind(until)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", &query))
            .await
            .context("failed to lock user")?;
        Ok(())
    }

    async fn reset_failed_logins(&self, tenant: &Tenant, user_id: &str) -> Result<()> {
        let query = format!(
            "UPDATE {} SET failed_login_attempts = 0, locked_until = NULL WHERE id = $1",
            tenant.table("users")
        );
        sqlx::query(&query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", &query))
            .await
            .context("failed to reset failed logins")?;
        Ok(())
    }

    async fn update_password(
        &self,
        tenant: &Tenant,
        user_id: &str,
        password: &PasswordHash,
    ) -> Result<()> {
        let query = format!(
            "UPDATE {} SET password_hash = $2, password_salt = $3, \
             failed_login_attempts = 0, locked_until = NULL WHERE id = $1",
            tenant.table("users")
        );
        sqlx::query(&query)
            .bind(user_id)
            .bind(&password.hash)
            .bind(&password.salt)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", &query))
            .await
            .context("failed to update password")?;
        Ok(())
    }

    async fn mark_email_verified(&self, tenant: &Tenant, user_id: &str) -> Result<()> {
        let query = format!(
            "UPDATE {} SET email_verified = TRUE WHERE id = $1",
            tenant.table("users")
        );
        sqlx::query(&query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", &query))
            .await
            .context("failed to mark email verified")?;
        Ok(())
    }

    async fn insert_session(&self, tenant: &Tenant, session: &SessionRecord) -> Result<()> {
        let query = format!(
            "INSERT INTO {} (id, user_id, secret_hash, created_at) VALUES ($1, $2, $3, $4)",
            tenant.table("sessions")
        );
        sqlx::query(&query)
            .bind(&session.id)
            .bind(&session.user_id)
            .bind(&session.secret_hash)
            .bind(session.created_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", &query))
            .await
            .context("failed to insert session")?;
        Ok(())
    }

    async fn find_session(
        &self,
        tenant: &Tenant,
        session_id: &str,
    ) -> Result<Option<SessionRecord>> {
        let query = format!(
            "SELECT id, user_id, secret_hash, created_at FROM {} WHERE id = $1",
            tenant.table("sessions")
        );
        let row = sqlx::query(&query)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup session")?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn delete_session(&self, tenant: &Tenant, session_id: &str) -> Result<bool> {
        let query = format!("DELETE FROM {} WHERE id = $1", tenant.table("sessions"));
        let result = sqlx::query(&query)
            .bind(session_id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", &query))
            .await
            .context("failed to delete session")?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_user_sessions(&self, tenant: &Tenant, user_id: &str) -> Result<u64> {
        let query = format!("DELETE FROM {} WHERE user_id = $1", tenant.table("sessions"));
        let result = sqlx::query(&query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", &query))
            .await
            .context("failed to delete user sessions")?;
        Ok(result.rows_affected())
    }

    async fn delete_sessions_created_by(
        &self,
        tenant: &Tenant,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        let query = format!(
            "DELETE FROM {} WHERE created_at <= $1",
            tenant.table("sessions")
        );
        let result = sqlx::query(&query)
            .bind(cutoff)
            .execute(&self.pool)
            .instrument(db_span("DELETE", &query))
            .await
            .context("failed to delete expired sessions")?;
        Ok(result.rows_affected())
    }

    async fn insert_csrf_token(
        &self,
        tenant: &Tenant,
        token_hash: &[u8],
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        let query = format!(
            "INSERT INTO {} (token_hash, created_at) VALUES ($1, $2)",
            tenant.table("csrf_tokens")
        );
        sqlx::query(&query)
            .bind(token_hash)
            .bind(created_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", &query))
            .await
            .context("failed to insert csrf token")?;
        Ok(())
    }

    async fn consume_csrf_token(
        &self,
        tenant: &Tenant,
        token_hash: &[u8],
        not_before: DateTime<Utc>,
    ) -> Result<bool> {
        let query = format!(
            "DELETE FROM {} WHERE token_hash = $1 AND created_at >= $2",
            tenant.table("csrf_tokens")
        );
        let result = sqlx::query(&query)
            .bind(token_hash)
            .bind(not_before)
            .execute(&self.pool)
            .instrument(db_span("DELETE", &query))
            .await
            .context("failed to consume csrf token")?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_csrf_tokens_created_before(
        &self,
        tenant: &Tenant,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        let query = format!(
            "DELETE FROM {} WHERE created_at < $1",
            tenant.table("csrf_tokens")
        );
        let result = sqlx::query(&query)
            .bind(cutoff)
            .execute(&self.pool)
            .instrument(db_span("DELETE", &query))
            .await
            .context("failed to delete expired csrf tokens")?;
        Ok(result.rows_affected())
    }

    async fn load_bucket(&self, tenant: &Tenant, key: &BucketKey) -> Result<Option<BucketState>> {
        let query = format!(
            "SELECT count, refilled_at_ms FROM {} \
             WHERE operation = $1 AND refill_interval_seconds = $2 AND client_key = $3",
            tenant.table("rate_limits")
        );
        let row = sqlx::query(&query)
            .bind(&key.operation)
            .bind(key.refill_interval_seconds)
            .bind(&key.client_key)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to load rate limit bucket")?;
        row.map(|row| -> Result<BucketState> {
            Ok(BucketState {
                count: row.try_get("count")?,
                refilled_at_ms: row.try_get("refilled_at_ms")?,
            })
        })
        .transpose()
    }

    async fn insert_bucket(
        &self,
        tenant: &Tenant,
        key: &BucketKey,
        state: BucketState,
    ) -> Result<bool> {
        let query = format!(
            "INSERT INTO {} (operation, refill_interval_seconds, client_key, count, refilled_at_ms) \
             VALUES ($1, $2, $3, $4, $5) ON CONFLICT DO NOTHING",
            tenant.table("rate_limits")
        );
        let result = sqlx::query(&query)
            .bind(&key.operation)
            .bind(key.refill_interval_seconds)
            .bind(&key.client_key)
            .bind(state.count)
            .bind(state.refilled_at_ms)
            .execute(&self.pool)
            .instrument(db_span("INSERT", &query))
            .await
            .context("failed to insert rate limit bucket")?;
        Ok(result.rows_affected() == 1)
    }

    async fn swap_bucket(
        &self,
        tenant: &Tenant,
        key: &BucketKey,
        expected: BucketState,
        next: BucketState,
    ) -> Result<bool> {
        let query = format!(
            "UPDATE {} SET count = $4, refilled_at_ms = $5 \
             WHERE operation = $1 AND refill_interval_seconds = $2 AND client_key = $3 \
             AND count = $6 AND refilled_at_ms = $7",
            tenant.table("rate_limits")
        );
        let result = sqlx::query(&query)
            .bind(&key.operation)
            .bind(key.refill_interval_seconds)
            .bind(&key.client_key)
            .bind(next.count)
            .bind(next.refilled_at_ms)
            .bind(expected.count)
            .bind(expected.refilled_at_ms)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", &query))
            .await
            .context("failed to update rate limit bucket")?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_buckets_refilled_before(&self, tenant: &Tenant, cutoff_ms: i64) -> Result<u64> {
        let query = format!(
            "DELETE FROM {} WHERE refilled_at_ms < $1",
            tenant.table("rate_limits")
        );
        let result = sqlx::query(&query)
            .bind(cutoff_ms)
            .execute(&self.pool)
            .instrument(db_span("DELETE", &query))
            .await
            .context("failed to delete stale rate limit buckets")?;
        Ok(result.rows_affected())
    }

    async fn insert_user_token(
        &self,
        tenant: &Tenant,
        kind: UserTokenKind,
        record: &UserTokenRecord,
    ) -> Result<()> {
        let query = format!(
            "INSERT INTO {} (token_hash, user_id, expires_at, created_at) VALUES ($1, $2, $3, $4)",
            tenant.table(kind.table())
        );
        sqlx::query(&query)
            .bind(&record.token_hash)
            .bind(&record.user_id)
            .bind(record.expires_at)
            .bind(record.created_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", &query))
            .await
            .with_context(|| format!("failed to insert {}", kind.table()))?;
        Ok(())
    }

    async fn consume_user_token(
        &self,
        tenant: &Tenant,
        kind: UserTokenKind,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<String>> {
        let query = format!(
            "DELETE FROM {} WHERE token_hash = $1 AND expires_at > $2 RETURNING user_id",
            tenant.table(kind.table())
        );
        let row = sqlx::query(&query)
            .bind(token_hash)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(db_span("DELETE", &query))
            .await
            .with_context(|| format!("failed to consume {}", kind.table()))?;
        row.map(|row| row.try_get("user_id").map_err(anyhow::Error::from))
            .transpose()
    }

    async fn delete_user_tokens_expired_by(
        &self,
        tenant: &Tenant,
        kind: UserTokenKind,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        let query = format!(
            "DELETE FROM {} WHERE expires_at <= $1",
            tenant.table(kind.table())
        );
        let result = sqlx::query(&query)
            .bind(cutoff)
            .execute(&self.pool)
            .instrument(db_span("DELETE", &query))
            .await
            .with_context(|| format!("failed to delete expired {}", kind.table()))?;
        Ok(result.rows_affected())
    }

    async fn find_oauth_provider(
        &self,
        tenant: &Tenant,
        name: &str,
    ) -> Result<Option<OAuthProviderRecord>> {
        let query = format!(
            "SELECT name, client_id, client_secret, redirect_uri, scope, enabled, \
             authorize_url, token_url, user_info_url FROM {} WHERE name = $1",
            tenant.table("oauth_providers")
        );
        let row = sqlx::query(&query)
            .bind(name)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup oauth provider")?;
        row.as_ref().map(provider_from_row).transpose()
    }

    async fn upsert_oauth_provider(
        &self,
        tenant: &Tenant,
        provider: &OAuthProviderRecord,
    ) -> Result<()> {
        let query = format!(
            "INSERT INTO {} (name, client_id, client_secret, redirect_uri, scope, enabled, \
             authorize_url, token_url, user_info_url) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (name) DO UPDATE SET client_id = EXCLUDED.client_id, \
             client_secret = EXCLUDED.client_secret, redirect_uri = EXCLUDED.redirect_uri, \
             scope = EXCLUDED.scope, enabled = EXCLUDED.enabled, \
             authorize_url = EXCLUDED.authorize_url, token_url = EXCLUDED.token_url, \
             user_info_url = EXCLUDED.user_info_url",
            tenant.table("oauth_providers")
        );
        sqlx::query(&query)
            .bind(&provider.name)
            .bind(&provider.client_id)
            .bind(provider.client_secret.expose_secret())
            .bind(&provider.redirect_uri)
            .bind(&provider.scope)
            .bind(provider.enabled)
            .bind(&provider.authorize_url)
            .bind(&provider.token_url)
            .bind(&provider.user_info_url)
            .execute(&self.pool)
            .instrument(db_span("INSERT", &query))
            .await
            .context("failed to upsert oauth provider")?;
        Ok(())
    }

    async fn find_oauth_account(
        &self,
        tenant: &Tenant,
        provider: &str,
        provider_user_id: &str,
    ) -> Result<Option<OAuthAccountRecord>> {
        let query = format!(
            "SELECT id, user_id, provider, provider_user_id, access_token, refresh_token, \
             expires_at, created_at FROM {} WHERE provider = $1 AND provider_user_id = $2",
            tenant.table("oauth_accounts")
        );
        let row = sqlx::query(&query)
            .bind(provider)
            .bind(provider_user_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup oauth account")?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn insert_oauth_account(
        &self,
        tenant: &Tenant,
        account: &OAuthAccountRecord,
    ) -> Result<()> {
        let query = format!(
            "INSERT INTO {} (id, user_id, provider, provider_user_id, access_token, \
             refresh_token, expires_at, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            tenant.table("oauth_accounts")
        );
        sqlx::query(&query)
            .bind(&account.id)
            .bind(&account.user_id)
            .bind(&account.provider)
            .bind(&account.provider_user_id)
            .bind(account.tokens.access_token.expose_secret())
            .bind(
                account
                    .tokens
                    .refresh_token
                    .as_ref()
                    .map(|token| token.expose_secret()),
            )
            .bind(account.tokens.expires_at)
            .bind(account.created_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", &query))
            .await
            .context("failed to insert oauth account")?;
        Ok(())
    }

    async fn update_oauth_tokens(
        &self,
        tenant: &Tenant,
        account_id: &str,
        tokens: &OAuthTokens,
    ) -> Result<()> {
        let query = format!(
            "UPDATE {} SET access_token = $2, refresh_token = $3, expires_at = $4 WHERE id = $1",
            tenant.table("oauth_accounts")
        );
        sqlx::query(&query)
            .bind(account_id)
            .bind(tokens.access_token.expose_secret())
            .bind(tokens.refresh_token.as_ref().map(|token| token.expose_secret()))
            .bind(tokens.expires_at)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", &query))
            .await
            .context("failed to update oauth tokens")?;
        Ok(())
    }

    async fn insert_oauth_state(&self, tenant: &Tenant, state: &OAuthStateRecord) -> Result<()> {
        let query = format!(
            "INSERT INTO {} (state_hash, provider, redirect_uri, created_at) \
             VALUES ($1, $2, $3, $4)",
            tenant.table("oauth_state_tokens")
        );
        sqlx::query(&query)
            .bind(&state.state_hash)
            .bind(&state.provider)
            .bind(&state.redirect_uri)
            .bind(state.created_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", &query))
            .await
            .context("failed to insert oauth state")?;
        Ok(())
    }

    async fn take_oauth_state(
        &self,
        tenant: &Tenant,
        state_hash: &[u8],
    ) -> Result<Option<OAuthStateRecord>> {
        let query = format!(
            "DELETE FROM {} WHERE state_hash = $1 \
             RETURNING state_hash, provider, redirect_uri, created_at",
            tenant.table("oauth_state_tokens")
        );
        let row = sqlx::query(&query)
            .bind(state_hash)
            .fetch_optional(&self.pool)
            .instrument(db_span("DELETE", &query))
            .await
            .context("failed to consume oauth state")?;
        row.map(|row| -> Result<OAuthStateRecord> {
            Ok(OAuthStateRecord {
                state_hash: row.try_get("state_hash")?,
                provider: row.try_get("provider")?,
                redirect_uri: row.try_get("redirect_uri")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .transpose()
    }

    async fn delete_oauth_states_created_by(
        &self,
        tenant: &Tenant,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        let query = format!(
            "DELETE FROM {} WHERE created_at <= $1",
            tenant.table("oauth_state_tokens")
        );
        let result = sqlx::query(&query)
            .bind(cutoff)
            .execute(&self.pool)
            .instrument(db_span("DELETE", &query))
            .await
            .context("failed to delete expired oauth states")?;
        Ok(result.rows_affected())
    }

    async fn claim_maintenance_run(
        &self,
        job: &str,
        now: DateTime<Utc>,
        min_interval: chrono::Duration,
    ) -> Result<bool> {
        let query = r"
            INSERT INTO maintenance_runs (job, last_run_at)
            VALUES ($1, $2)
            ON CONFLICT (job) DO UPDATE SET last_run_at = EXCLUDED.last_run_at
            WHERE maintenance_runs.last_run_at <= $3
        ";
        let result = sqlx::query(query)
            .bind(job)
            .bind(now)
            .bind(now - min_interval)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to claim maintenance run")?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    #[derive(Debug)]
    struct FakeDbError {
        code: Option<&'static str>,
    }

    impl fmt::Display for FakeDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "fake database error")
        }
    }

    impl StdError for FakeDbError {}

    impl DatabaseError for FakeDbError {
        fn message(&self) -> &'static str {
            "fake database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    #[test]
    fn unique_violation_is_detected_by_sqlstate() {
        let err = sqlx::Error::Database(Box::new(FakeDbError {
            code: Some("23505"),
        }));
        assert!(is_unique_violation(&err));

        let err = sqlx::Error::Database(Box::new(FakeDbError {
            code: Some("40001"),
        }));
        assert!(!is_unique_violation(&err));
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn tenant_ddl_is_fully_prefixed() -> Result<()> {
        let tenant = Tenant::parse("acme")?;
        let ddl = TENANT_DDL.replace(TENANT_PLACEHOLDER, tenant.as_str());
        assert!(!ddl.contains(TENANT_PLACEHOLDER));
        for table in [
            "users",
            "sessions",
            "csrf_tokens",
            "rate_limits",
            "password_reset_tokens",
            "email_verification_tokens",
            "oauth_providers",
            "oauth_accounts",
            "oauth_state_tokens",
        ] {
            assert!(
                ddl.contains(&format!("CREATE TABLE IF NOT EXISTS {}", tenant.table(table))),
                "missing table {table}"
            );
        }
        Ok(())
    }
}
