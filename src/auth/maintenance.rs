//! Periodic cleanup of expired rows across all tenants.
//!
//! Any number of instances may run the worker. Each wake-up tries to claim the
//! global `cleanup` tracking row, which only succeeds once per 12 hours, so at
//! most one pass runs per window no matter how often the scheduler fires.

use anyhow::Result;
use chrono::Duration;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{Instrument, error, info, info_span};

use super::state::AuthState;
use crate::{store::UserTokenKind, tenant::Tenant};

pub const CLEANUP_JOB: &str = "cleanup";
const MIN_RUN_SPACING_HOURS: i64 = 12;

/// Rows removed for one tenant during a cleanup pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TenantCleanup {
    pub sessions: u64,
    pub csrf_tokens: u64,
    pub rate_limits: u64,
    pub oauth_states: u64,
    pub password_reset_tokens: u64,
    pub email_verification_tokens: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub tenants: Vec<(Tenant, TenantCleanup)>,
    pub failed: Vec<Tenant>,
}

async fn cleanup_tenant(state: &AuthState, tenant: &Tenant) -> Result<TenantCleanup> {
    let now = state.clock().now();
    let oauth_state_cutoff = now - Duration::seconds(state.config().oauth_state_ttl_seconds());
    let bucket_cutoff_ms =
        (now - Duration::seconds(state.config().rate_limit_retention_seconds())).timestamp_millis();
    let store = state.store();

    let mut report = TenantCleanup {
        sessions: state.sessions().cleanup_expired_sessions(tenant).await?,
        csrf_tokens: state.csrf().cleanup(tenant).await?,
        rate_limits: state.rate_limiter().cleanup(tenant, bucket_cutoff_ms).await?,
        oauth_states: store
            .delete_oauth_states_created_by(tenant, oauth_state_cutoff)
            .await?,
        ..TenantCleanup::default()
    };
    for kind in UserTokenKind::ALL {
        let removed = store
            .delete_user_tokens_expired_by(tenant, kind, now)
            .await?;
        match kind {
            UserTokenKind::PasswordReset => report.password_reset_tokens = removed,
            UserTokenKind::EmailVerification => report.email_verification_tokens = removed,
        }
    }
    Ok(report)
}

/// Run a cleanup pass if no instance has run one in the last 12 hours.
///
/// Returns `None` when the pass was not due. A failing tenant is logged and
/// recorded in the report without stopping the others.
///
/// # Errors
/// Returns an error only if the tracking row cannot be claimed.
pub async fn run_if_due(state: &AuthState) -> Result<Option<CleanupReport>> {
    let claimed = state
        .store()
        .claim_maintenance_run(
            CLEANUP_JOB,
            state.clock().now(),
            Duration::hours(MIN_RUN_SPACING_HOURS),
        )
        .await?;
    if !claimed {
        return Ok(None);
    }

    let mut report = CleanupReport::default();
    for tenant in state.config().tenants() {
        match cleanup_tenant(state, tenant).await {
            Ok(cleaned) => {
                info!(
                    tenant = %tenant,
                    sessions = cleaned.sessions,
                    csrf_tokens = cleaned.csrf_tokens,
                    rate_limits = cleaned.rate_limits,
                    oauth_states = cleaned.oauth_states,
                    password_reset_tokens = cleaned.password_reset_tokens,
                    email_verification_tokens = cleaned.email_verification_tokens,
                    "Tenant cleanup finished"
                );
                report.tenants.push((tenant.clone(), cleaned));
            }
            Err(err) => {
                error!(tenant = %tenant, "Tenant cleanup failed: {err:#}");
                report.failed.push(tenant.clone());
            }
        }
    }
    Ok(Some(report))
}

/// Spawn a background task that wakes every `poll_interval` and runs
/// [`run_if_due`].
pub fn spawn_maintenance_worker(
    state: Arc<AuthState>,
    poll_interval: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    let poll_interval = if poll_interval.is_zero() {
        std::time::Duration::from_secs(1)
    } else {
        poll_interval
    };
    tokio::spawn(async move {
        loop {
            let pass = run_if_due(&state).instrument(info_span!("maintenance.cleanup"));
            if let Err(err) = pass.await {
                error!("maintenance pass failed: {err:#}");
            }
            sleep(poll_interval).await;
        }
    })
}
