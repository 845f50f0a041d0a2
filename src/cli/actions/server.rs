use crate::{
    api::{self, HttpConfig},
    auth::{
        AuthConfig, AuthState,
        email::WebhookEmailSender,
        lockout::LockoutPolicy,
        maintenance,
        rate_limit::RateLimitRules,
    },
    cli::telemetry,
    store::{AuthStore, MemoryStore, OAuthProviderRecord, PgStore},
    tenant::Tenant,
};
use anyhow::{Context, Result, bail};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sqlx::postgres::PgPoolOptions;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tracing::{info, warn};

const MEMORY_DSN: &str = "memory:";
const TENANT_PLACEHOLDER: &str = "{tenant}";

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: SecretString,
    pub tenants: Vec<Tenant>,
    pub frontend_base_url: String,
    pub require_csrf: bool,
    pub lockout: LockoutPolicy,
    pub rate_limits: RateLimitRules,
    pub rate_limit_retention_seconds: i64,
    pub oauth_timeout_seconds: u64,
    pub oauth_providers_file: Option<PathBuf>,
    pub email_webhook_url: Option<String>,
    pub email_webhook_timeout_seconds: u64,
    pub maintenance_poll_seconds: u64,
    pub http: HttpConfig,
}

/// One row of the OAuth provider bootstrap file.
///
/// `redirectUri` may contain `{tenant}`, replaced per tenant. Rows without
/// `tenants` apply to every served tenant.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ProviderEntry {
    pub name: String,
    #[serde(default)]
    pub tenants: Option<Vec<String>>,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub authorize_url: Option<String>,
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default)]
    pub user_info_url: Option<String>,
}

const fn enabled_by_default() -> bool {
    true
}

impl ProviderEntry {
    fn applies_to(&self, tenant: &Tenant) -> Result<bool> {
        let Some(tenants) = &self.tenants else {
            return Ok(true);
        };
        for name in tenants {
            let listed = Tenant::parse(name)
                .with_context(|| format!("provider {}: invalid tenant {name}", self.name))?;
            if &listed == tenant {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn record_for(&self, tenant: &Tenant) -> OAuthProviderRecord {
        OAuthProviderRecord {
            name: self.name.trim().to_lowercase(),
            client_id: self.client_id.clone(),
            client_secret: SecretString::from(self.client_secret.clone()),
            redirect_uri: self.redirect_uri.replace(TENANT_PLACEHOLDER, tenant.as_str()),
            scope: self.scope.clone(),
            enabled: self.enabled,
            authorize_url: self.authorize_url.clone(),
            token_url: self.token_url.clone(),
            user_info_url: self.user_info_url.clone(),
        }
    }
}

/// Parse the provider bootstrap document.
///
/// # Errors
/// Returns an error for invalid JSON or rows without a name.
pub fn parse_providers(json: &str) -> Result<Vec<ProviderEntry>> {
    let entries: Vec<ProviderEntry> =
        serde_json::from_str(json).context("Invalid OAuth providers JSON")?;
    if let Some(entry) = entries.iter().find(|entry| entry.name.trim().is_empty()) {
        bail!("OAuth provider with client id {} has no name", entry.client_id);
    }
    Ok(entries)
}

async fn open_store(dsn: &str) -> Result<Arc<dyn AuthStore>> {
    if dsn == MEMORY_DSN {
        warn!("Using the in-memory store: data is lost on restart and not shared between instances");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(10)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")?;

    Ok(Arc::new(PgStore::new(pool).await?))
}

async fn bootstrap_providers(
    store: &dyn AuthStore,
    tenants: &[Tenant],
    path: &Path,
) -> Result<()> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read OAuth providers file: {}", path.display()))?;
    let entries = parse_providers(&json)?;
    for tenant in tenants {
        for entry in &entries {
            if !entry.applies_to(tenant)? {
                continue;
            }
            store
                .upsert_oauth_provider(tenant, &entry.record_for(tenant))
                .await
                .with_context(|| format!("Failed to store provider {} for {tenant}", entry.name))?;
            info!(tenant = %tenant, provider = %entry.name, "OAuth provider configured");
        }
    }
    Ok(())
}

/// Execute the server action.
/// # Errors
/// Returns an error if the store cannot be opened or provisioned, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let store = open_store(args.dsn.expose_secret()).await?;

    for tenant in &args.tenants {
        store
            .provision_tenant(tenant)
            .await
            .with_context(|| format!("Failed to provision tenant {tenant}"))?;
    }
    info!(tenants = args.tenants.len(), "Tenants provisioned");

    if let Some(path) = &args.oauth_providers_file {
        bootstrap_providers(store.as_ref(), &args.tenants, path).await?;
    }

    let auth_config = AuthConfig::new(args.frontend_base_url, args.tenants)
        .with_require_csrf(args.require_csrf)
        .with_lockout(args.lockout)
        .with_rate_limits(args.rate_limits)
        .with_rate_limit_retention_seconds(args.rate_limit_retention_seconds)
        .with_oauth_timeout(Duration::from_secs(args.oauth_timeout_seconds));

    let mut auth_state = AuthState::new(auth_config, store)?;
    if let Some(url) = args.email_webhook_url {
        let sender =
            WebhookEmailSender::new(url, Duration::from_secs(args.email_webhook_timeout_seconds))?;
        auth_state = auth_state.with_email_sender(Arc::new(sender));
    } else {
        warn!("No email webhook configured: emails are written to the log only");
    }
    let auth_state = Arc::new(auth_state);

    let worker = maintenance::spawn_maintenance_worker(
        auth_state.clone(),
        Duration::from_secs(args.maintenance_poll_seconds),
    );

    let served = api::new(args.port, auth_state, args.http).await;

    worker.abort();
    telemetry::shutdown_tracer();
    served
}
