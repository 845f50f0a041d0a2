//! Auth configuration and the shared state handed to every request.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use super::{
    clock::{Clock, SystemClock},
    csrf::{CSRF_TTL_SECONDS, CsrfManager},
    email::{EmailSender, LogEmailSender},
    lockout::LockoutPolicy,
    oauth::OAuthFlow,
    rate_limit::{RateLimitRules, RateLimiter},
    session::{SESSION_TTL_SECONDS, SessionManager},
};
use crate::{store::AuthStore, tenant::Tenant};

const DEFAULT_PASSWORD_RESET_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_EMAIL_VERIFICATION_TTL_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_OAUTH_STATE_TTL_SECONDS: i64 = 10 * 60;
const DEFAULT_OAUTH_TIMEOUT_SECONDS: u64 = 10;
const DEFAULT_RATE_LIMIT_RETENTION_SECONDS: i64 = 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    tenants: Vec<Tenant>,
    session_ttl_seconds: i64,
    csrf_ttl_seconds: i64,
    require_csrf: bool,
    password_reset_ttl_seconds: i64,
    email_verification_ttl_seconds: i64,
    oauth_state_ttl_seconds: i64,
    oauth_timeout: Duration,
    lockout: LockoutPolicy,
    rate_limits: RateLimitRules,
    rate_limit_retention_seconds: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String, tenants: Vec<Tenant>) -> Self {
        Self {
            frontend_base_url,
            tenants,
            session_ttl_seconds: SESSION_TTL_SECONDS,
            csrf_ttl_seconds: CSRF_TTL_SECONDS,
            require_csrf: false,
            password_reset_ttl_seconds: DEFAULT_PASSWORD_RESET_TTL_SECONDS,
            email_verification_ttl_seconds: DEFAULT_EMAIL_VERIFICATION_TTL_SECONDS,
            oauth_state_ttl_seconds: DEFAULT_OAUTH_STATE_TTL_SECONDS,
            oauth_timeout: Duration::from_secs(DEFAULT_OAUTH_TIMEOUT_SECONDS),
            lockout: LockoutPolicy::default(),
            rate_limits: RateLimitRules::default(),
            rate_limit_retention_seconds: DEFAULT_RATE_LIMIT_RETENTION_SECONDS,
        }
    }

    #[must_use]
    pub fn with_require_csrf(mut self, require: bool) -> Self {
        self.require_csrf = require;
        self
    }

    #[must_use]
    pub fn with_lockout(mut self, lockout: LockoutPolicy) -> Self {
        self.lockout = lockout;
        self
    }

    #[must_use]
    pub fn with_rate_limits(mut self, rate_limits: RateLimitRules) -> Self {
        self.rate_limits = rate_limits;
        self
    }

    #[must_use]
    pub fn with_rate_limit_retention_seconds(mut self, seconds: i64) -> Self {
        self.rate_limit_retention_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_oauth_timeout(mut self, timeout: Duration) -> Self {
        self.oauth_timeout = timeout;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn tenants(&self) -> &[Tenant] {
        &self.tenants
    }

    #[must_use]
    pub fn serves(&self, tenant: &Tenant) -> bool {
        self.tenants.contains(tenant)
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn require_csrf(&self) -> bool {
        self.require_csrf
    }

    #[must_use]
    pub fn password_reset_ttl_seconds(&self) -> i64 {
        self.password_reset_ttl_seconds
    }

    #[must_use]
    pub fn email_verification_ttl_seconds(&self) -> i64 {
        self.email_verification_ttl_seconds
    }

    #[must_use]
    pub fn oauth_state_ttl_seconds(&self) -> i64 {
        self.oauth_state_ttl_seconds
    }

    #[must_use]
    pub fn oauth_timeout(&self) -> Duration {
        self.oauth_timeout
    }

    #[must_use]
    pub fn lockout(&self) -> &LockoutPolicy {
        &self.lockout
    }

    #[must_use]
    pub fn rate_limits(&self) -> &RateLimitRules {
        &self.rate_limits
    }

    #[must_use]
    pub fn rate_limit_retention_seconds(&self) -> i64 {
        self.rate_limit_retention_seconds
    }
}

pub struct AuthState {
    config: AuthConfig,
    store: Arc<dyn AuthStore>,
    clock: Arc<dyn Clock>,
    email: Arc<dyn EmailSender>,
    http: reqwest::Client,
}

impl AuthState {
    /// Build state with the system clock and the logging email sender.
    ///
    /// # Errors
    /// Returns an error if the outbound HTTP client cannot be built.
    pub fn new(config: AuthConfig, store: Arc<dyn AuthStore>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(config.oauth_timeout())
            .build()
            .context("failed to build OAuth HTTP client")?;
        Ok(Self {
            config,
            store,
            clock: Arc::new(SystemClock),
            email: Arc::new(LogEmailSender),
            http,
        })
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_email_sender(mut self, email: Arc<dyn EmailSender>) -> Self {
        self.email = email;
        self
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &dyn AuthStore {
        self.store.as_ref()
    }

    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    #[must_use]
    pub fn email(&self) -> &dyn EmailSender {
        self.email.as_ref()
    }

    #[must_use]
    pub fn sessions(&self) -> SessionManager<'_> {
        SessionManager::new(
            self.store(),
            self.clock(),
            self.config.session_ttl_seconds(),
        )
    }

    #[must_use]
    pub fn csrf(&self) -> CsrfManager<'_> {
        CsrfManager::new(self.store(), self.clock(), self.config.csrf_ttl_seconds)
    }

    #[must_use]
    pub fn rate_limiter(&self) -> RateLimiter<'_> {
        RateLimiter::new(self.store(), self.clock(), self.config.rate_limits())
    }

    #[must_use]
    pub fn oauth(&self) -> OAuthFlow<'_> {
        OAuthFlow::new(self, &self.http)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::rate_limit::RateLimitRule;
    use crate::store::MemoryStore;

    #[test]
    fn auth_config_defaults_and_overrides() -> Result<()> {
        let tenant = Tenant::parse("acme")?;
        let config = AuthConfig::new("https://app.example.com".to_string(), vec![tenant.clone()]);

        assert_eq!(config.frontend_base_url(), "https://app.example.com");
        assert!(config.serves(&tenant));
        assert!(!config.serves(&Tenant::parse("globex")?));
        assert_eq!(config.session_ttl_seconds(), 86_400);
        assert_eq!(config.password_reset_ttl_seconds(), 900);
        assert_eq!(config.email_verification_ttl_seconds(), 86_400);
        assert_eq!(config.oauth_state_ttl_seconds(), 600);
        assert_eq!(config.oauth_timeout(), Duration::from_secs(10));
        assert!(!config.require_csrf());

        let rules = RateLimitRules {
            login: RateLimitRule::new(1, 1),
            ..RateLimitRules::default()
        };
        let config = config
            .with_require_csrf(true)
            .with_rate_limits(rules)
            .with_rate_limit_retention_seconds(60)
            .with_oauth_timeout(Duration::from_secs(2));

        assert!(config.require_csrf());
        assert_eq!(config.rate_limits().login, RateLimitRule::new(1, 1));
        assert_eq!(config.rate_limit_retention_seconds(), 60);
        assert_eq!(config.oauth_timeout(), Duration::from_secs(2));
        Ok(())
    }

    #[test]
    fn auth_state_builds_with_memory_store() -> Result<()> {
        let config = AuthConfig::new("https://app.example.com".to_string(), Vec::new());
        let state = AuthState::new(config, Arc::new(MemoryStore::new()))?;
        assert_eq!(state.config().frontend_base_url(), "https://app.example.com");
        Ok(())
    }
}
