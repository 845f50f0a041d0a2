//! Ephemeral in-process store for local development (`--dsn memory:`) and tests.
//!
//! Every operation holds a single lock for its whole duration, which gives the
//! same single-statement atomicity the Postgres store gets from row locks.
//! Data is lost on restart and is not shared between instances.

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{
    Mutex, MutexGuard,
    atomic::{AtomicBool, Ordering},
};

use super::{
    AuthStore, BucketKey, BucketState, InsertUserOutcome, OAuthAccountRecord, OAuthProviderRecord,
    OAuthStateRecord, OAuthTokens, SessionRecord, UserRecord, UserTokenKind, UserTokenRecord,
};
use crate::{crypto::PasswordHash, tenant::Tenant};

#[derive(Default)]
struct TenantTables {
    users: HashMap<String, UserRecord>,
    sessions: HashMap<String, SessionRecord>,
    csrf_tokens: HashMap<Vec<u8>, DateTime<Utc>>,
    buckets: HashMap<BucketKey, BucketState>,
    user_tokens: HashMap<(UserTokenKind, Vec<u8>), UserTokenRecord>,
    oauth_providers: HashMap<String, OAuthProviderRecord>,
    oauth_accounts: HashMap<String, OAuthAccountRecord>,
    oauth_states: HashMap<Vec<u8>, OAuthStateRecord>,
}

#[derive(Default)]
struct MemoryState {
    tenants: HashMap<Tenant, TenantTables>,
    maintenance_runs: HashMap<String, DateTime<Utc>>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail, as an unreachable database would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("memory store is unavailable");
        }
        self.state
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }

    fn with_tenant<T>(
        &self,
        tenant: &Tenant,
        f: impl FnOnce(&mut TenantTables) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.lock()?;
        let tables = state
            .tenants
            .get_mut(tenant)
            .ok_or_else(|| anyhow!("tenant {tenant} is not provisioned"))?;
        f(tables)
    }

    fn with_user<T>(
        &self,
        tenant: &Tenant,
        user_id: &str,
        f: impl FnOnce(&mut UserRecord) -> T,
    ) -> Result<T> {
        self.with_tenant(tenant, |tables| {
            let user = tables
                .users
                .get_mut(user_id)
                .ok_or_else(|| anyhow!("user {user_id} not found"))?;
            Ok(f(user))
        })
    }
}

fn count(removed: usize) -> u64 {
    u64::try_from(removed).unwrap_or(u64::MAX)
}

#[async_trait]
impl AuthStore for MemoryStore {
    async fn provision_tenant(&self, tenant: &Tenant) -> Result<()> {
        self.lock()?.tenants.entry(tenant.clone()).or_default();
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.lock().map(|_| ())
    }

    async fn insert_user(&self, tenant: &Tenant, user: &UserRecord) -> Result<InsertUserOutcome> {
        self.with_tenant(tenant, |tables| {
            if tables.users.values().any(|u| u.email == user.email) {
                return Ok(InsertUserOutcome::Conflict);
            }
            tables.users.insert(user.id.clone(), user.clone());
            Ok(InsertUserOutcome::Created)
        })
    }

    async fn find_user_by_email(&self, tenant: &Tenant, email: &str) -> Result<Option<UserRecord>> {
        self.with_tenant(tenant, |tables| {
            Ok(tables.users.values().find(|u| u.email == email).cloned())
        })
    }

    async fn find_user_by_id(&self, tenant: &Tenant, user_id: &str) -> Result<Option<UserRecord>> {
        self.with_tenant(tenant, |tables| Ok(tables.users.get(user_id).cloned()))
    }

    async fn record_failed_login(&self, tenant: &Tenant, user_id: &str) -> Result<u32> {
        self.with_user(tenant, user_id, |user| {
            user.failed_login_attempts = user.failed_login_attempts.saturating_add(1);
            user.failed_login_attempts
        })
    }

    async fn lock_user(&self, tenant: &Tenant, user_id: &str, until: DateTime<Utc>) -> Result<()> {
        self.with_user(tenant, user_id, |user| {
            user.locked_until = Some(user.locked_until.map_or(until, |current| current.max(until)));
        })
    }

    async fn reset_failed_logins(&self, tenant: &Tenant, user_id: &str) -> Result<()> {
        self.with_user(tenant, user_id, |user| {
            user.failed_login_attempts = 0;
            user.locked_until = None;
        })
    }

    async fn update_password(
        &self,
        tenant: &Tenant,
        user_id: &str,
        password: &PasswordHash,
    ) -> Result<()> {
        self.with_user(tenant, user_id, |user| {
            user.password = Some(password.clone());
            user.failed_login_attempts = 0;
            user.locked_until = None;
        })
    }

    async fn mark_email_verified(&self, tenant: &Tenant, user_id: &str) -> Result<()> {
        self.with_user(tenant, user_id, |user| user.email_verified = true)
    }

    async fn insert_session(&self, tenant: &Tenant, session: &SessionRecord) -> Result<()> {
        self.with_tenant(tenant, |tables| {
            if tables.sessions.contains_key(&session.id) {
                bail!("duplicate session id");
            }
            tables.sessions.insert(session.id.clone(), session.clone());
            Ok(())
        })
    }

    async fn find_session(
        &self,
        tenant: &Tenant,
        session_id: &str,
    ) -> Result<Option<SessionRecord>> {
        self.with_tenant(tenant, |tables| Ok(tables.sessions.get(session_id).cloned()))
    }

    async fn delete_session(&self, tenant: &Tenant, session_id: &str) -> Result<bool> {
        self.with_tenant(tenant, |tables| Ok(tables.sessions.remove(session_id).is_some()))
    }

    async fn delete_user_sessions(&self, tenant: &Tenant, user_id: &str) -> Result<u64> {
        self.with_tenant(tenant, |tables| {
            let before = tables.sessions.len();
            tables.sessions.retain(|_, s| s.user_id != user_id);
            Ok(count(before - tables.sessions.len()))
        })
    }

    async fn delete_sessions_created_by(
        &self,
        tenant: &Tenant,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        self.with_tenant(tenant, |tables| {
            let before = tables.sessions.len();
            tables.sessions.retain(|_, s| s.created_at > cutoff);
            Ok(count(before - tables.sessions.len()))
        })
    }

    async fn insert_csrf_token(
        &self,
        tenant: &Tenant,
        token_hash: &[u8],
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_tenant(tenant, |tables| {
            tables.csrf_tokens.insert(token_hash.to_vec(), created_at);
            Ok(())
        })
    }

    async fn consume_csrf_token(
        &self,
        tenant: &Tenant,
        token_hash: &[u8],
        not_before: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_tenant(tenant, |tables| {
            let fresh = tables
                .csrf_tokens
                .get(token_hash)
                .is_some_and(|created_at| *created_at >= not_before);
            if fresh {
                tables.csrf_tokens.remove(token_hash);
            }
            Ok(fresh)
        })
    }

    async fn delete_csrf_tokens_created_before(
        &self,
        tenant: &Tenant,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        self.with_tenant(tenant, |tables| {
            let before = tables.csrf_tokens.len();
            tables.csrf_tokens.retain(|_, created_at| *created_at >= cutoff);
            Ok(count(before - tables.csrf_tokens.len()))
        })
    }

    async fn load_bucket(&self, tenant: &Tenant, key: &BucketKey) -> Result<Option<BucketState>> {
        self.with_tenant(tenant, |tables| Ok(tables.buckets.get(key).copied()))
    }

    async fn insert_bucket(
        &self,
        tenant: &Tenant,
        key: &BucketKey,
        state: BucketState,
    ) -> Result<bool> {
        self.with_tenant(tenant, |tables| {
            if tables.buckets.contains_key(key) {
                return Ok(false);
            }
            tables.buckets.insert(key.clone(), state);
            Ok(true)
        })
    }

    async fn swap_bucket(
        &self,
        tenant: &Tenant,
        key: &BucketKey,
        expected: BucketState,
        next: BucketState,
    ) -> Result<bool> {
        self.with_tenant(tenant, |tables| match tables.buckets.get_mut(key) {
            Some(current) if *current == expected => {
                *current = next;
                Ok(true)
            }
            _ => Ok(false),
        })
    }

    async fn delete_buckets_refilled_before(&self, tenant: &Tenant, cutoff_ms: i64) -> Result<u64> {
        self.with_tenant(tenant, |tables| {
            let before = tables.buckets.len();
            tables.buckets.retain(|_, state| state.refilled_at_ms >= cutoff_ms);
            Ok(count(before - tables.buckets.len()))
        })
    }

    async fn insert_user_token(
        &self,
        tenant: &Tenant,
        kind: UserTokenKind,
        record: &UserTokenRecord,
    ) -> Result<()> {
        self.with_tenant(tenant, |tables| {
            if !tables.users.contains_key(&record.user_id) {
                bail!("user {} not found", record.user_id);
            }
            tables
                .user_tokens
                .insert((kind, record.token_hash.clone()), record.clone());
            Ok(())
        })
    }

    async fn consume_user_token(
        &self,
        tenant: &Tenant,
        kind: UserTokenKind,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<String>> {
        self.with_tenant(tenant, |tables| {
            let key = (kind, token_hash.to_vec());
            let live = tables
                .user_tokens
                .get(&key)
                .is_some_and(|record| record.expires_at > now);
            if !live {
                return Ok(None);
            }
            Ok(tables.user_tokens.remove(&key).map(|record| record.user_id))
        })
    }

    async fn delete_user_tokens_expired_by(
        &self,
        tenant: &Tenant,
        kind: UserTokenKind,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        self.with_tenant(tenant, |tables| {
            let before = tables.user_tokens.len();
            tables
                .user_tokens
                .retain(|(k, _), record| *k != kind || record.expires_at > cutoff);
            Ok(count(before - tables.user_tokens.len()))
        })
    }

    async fn find_oauth_provider(
        &self,
        tenant: &Tenant,
        name: &str,
    ) -> Result<Option<OAuthProviderRecord>> {
        self.with_tenant(tenant, |tables| Ok(tables.oauth_providers.get(name).cloned()))
    }

    async fn upsert_oauth_provider(
        &self,
        tenant: &Tenant,
        provider: &OAuthProviderRecord,
    ) -> Result<()> {
        self.with_tenant(tenant, |tables| {
            tables
                .oauth_providers
                .insert(provider.name.clone(), provider.clone());
            Ok(())
        })
    }

    async fn find_oauth_account(
        &self,
        tenant: &Tenant,
        provider: &str,
        provider_user_id: &str,
    ) -> Result<Option<OAuthAccountRecord>> {
        self.with_tenant(tenant, |tables| {
            Ok(tables
                .oauth_accounts
                .values()
                .find(|a| a.provider == provider && a.provider_user_id == provider_user_id)
                .cloned())
        })
    }

    async fn insert_oauth_account(
        &self,
        tenant: &Tenant,
        account: &OAuthAccountRecord,
    ) -> Result<()> {
        self.with_tenant(tenant, |tables| {
            let linked = tables.oauth_accounts.values().any(|a| {
                a.provider == account.provider && a.provider_user_id == account.provider_user_id
            });
            if linked {
                bail!("oauth account already linked");
            }
            tables
                .oauth_accounts
                .insert(account.id.clone(), account.clone());
            Ok(())
        })
    }

    async fn update_oauth_tokens(
        &self,
        tenant: &Tenant,
        account_id: &str,
        tokens: &OAuthTokens,
    ) -> Result<()> {
        self.with_tenant(tenant, |tables| {
            let account = tables
                .oauth_accounts
                .get_mut(account_id)
                .ok_or_else(|| anyhow!("oauth account {account_id} not found"))?;
            account.tokens = tokens.clone();
            Ok(())
        })
    }

    async fn insert_oauth_state(&self, tenant: &Tenant, state: &OAuthStateRecord) -> Result<()> {
        self.with_tenant(tenant, |tables| {
            tables
                .oauth_states
                .insert(state.state_hash.clone(), state.clone());
            Ok(())
        })
    }

    async fn take_oauth_state(
        &self,
        tenant: &Tenant,
        state_hash: &[u8],
    ) -> Result<Option<OAuthStateRecord>> {
        self.with_tenant(tenant, |tables| Ok(tables.oauth_states.remove(state_hash)))
    }

    async fn delete_oauth_states_created_by(
        &self,
        tenant: &Tenant,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        self.with_tenant(tenant, |tables| {
            let before = tables.oauth_states.len();
            tables.oauth_states.retain(|_, s| s.created_at > cutoff);
            Ok(count(before - tables.oauth_states.len()))
        })
    }

    async fn claim_maintenance_run(
        &self,
        job: &str,
        now: DateTime<Utc>,
        min_interval: chrono::Duration,
    ) -> Result<bool> {
        let mut state = self.lock()?;
        match state.maintenance_runs.get_mut(job) {
            Some(last_run_at) if *last_run_at > now - min_interval => Ok(false),
            Some(last_run_at) => {
                *last_run_at = now;
                Ok(true)
            }
            None => {
                state.maintenance_runs.insert(job.to_string(), now);
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn tenant() -> Tenant {
        Tenant::parse("acme").unwrap()
    }

    fn user(id: &str, email: &str) -> UserRecord {
        UserRecord {
            id: id.to_string(),
            email: email.to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            password: None,
            email_verified: false,
            failed_login_attempts: 0,
            locked_until: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn unprovisioned_tenant_is_an_error() {
        let store = MemoryStore::new();
        assert!(store.find_user_by_id(&tenant(), "u1").await.is_err());
    }

    #[tokio::test]
    async fn tenants_do_not_share_rows() -> Result<()> {
        let store = MemoryStore::new();
        let acme = tenant();
        let globex = Tenant::parse("globex")?;
        store.provision_tenant(&acme).await?;
        store.provision_tenant(&globex).await?;

        store.insert_user(&acme, &user("u1", "a@example.com")).await?;
        assert!(store.find_user_by_id(&globex, "u1").await?.is_none());
        assert_eq!(
            store.insert_user(&globex, &user("u2", "a@example.com")).await?,
            InsertUserOutcome::Created
        );
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() -> Result<()> {
        let store = MemoryStore::new();
        store.provision_tenant(&tenant()).await?;
        store.insert_user(&tenant(), &user("u1", "a@example.com")).await?;
        assert_eq!(
            store.insert_user(&tenant(), &user("u2", "a@example.com")).await?,
            InsertUserOutcome::Conflict
        );
        Ok(())
    }

    #[tokio::test]
    async fn lock_keeps_the_later_expiry() -> Result<()> {
        let store = MemoryStore::new();
        store.provision_tenant(&tenant()).await?;
        store.insert_user(&tenant(), &user("u1", "a@example.com")).await?;
        let now = Utc::now();

        store.lock_user(&tenant(), "u1", now + Duration::hours(24)).await?;
        store.lock_user(&tenant(), "u1", now + Duration::minutes(5)).await?;
        let locked = store.find_user_by_id(&tenant(), "u1").await?;
        assert_eq!(
            locked.and_then(|u| u.locked_until),
            Some(now + Duration::hours(24))
        );

        store.reset_failed_logins(&tenant(), "u1").await?;
        store.lock_user(&tenant(), "u1", now + Duration::minutes(5)).await?;
        let relocked = store.find_user_by_id(&tenant(), "u1").await?;
        assert_eq!(
            relocked.and_then(|u| u.locked_until),
            Some(now + Duration::minutes(5))
        );
        Ok(())
    }

    #[tokio::test]
    async fn swap_bucket_requires_expected_state() -> Result<()> {
        let store = MemoryStore::new();
        store.provision_tenant(&tenant()).await?;
        let key = BucketKey {
            operation: "login".to_string(),
            refill_interval_seconds: 900,
            client_key: "10.0.0.1".to_string(),
        };
        let first = BucketState {
            count: 4,
            refilled_at_ms: 1,
        };
        let next = BucketState {
            count: 3,
            refilled_at_ms: 1,
        };
        assert!(store.insert_bucket(&tenant(), &key, first).await?);
        assert!(!store.insert_bucket(&tenant(), &key, first).await?);
        assert!(store.swap_bucket(&tenant(), &key, first, next).await?);
        assert!(!store.swap_bucket(&tenant(), &key, first, next).await?);
        assert_eq!(store.load_bucket(&tenant(), &key).await?, Some(next));
        Ok(())
    }

    #[tokio::test]
    async fn maintenance_claim_respects_interval() -> Result<()> {
        let store = MemoryStore::new();
        let now = Utc::now();
        let interval = Duration::hours(12);
        assert!(store.claim_maintenance_run("cleanup", now, interval).await?);
        assert!(
            !store
                .claim_maintenance_run("cleanup", now + Duration::hours(11), interval)
                .await?
        );
        assert!(
            store
                .claim_maintenance_run("cleanup", now + Duration::hours(12), interval)
                .await?
        );
        Ok(())
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() -> Result<()> {
        let store = MemoryStore::new();
        store.provision_tenant(&tenant()).await?;
        store.set_unavailable(true);
        assert!(store.ping().await.is_err());
        store.set_unavailable(false);
        store.ping().await
    }
}
