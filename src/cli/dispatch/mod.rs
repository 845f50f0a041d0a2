//! Map parsed CLI arguments to the action the binary runs.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{ARG_DSN, ARG_PORT, auth, http};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;

    let auth_opts = auth::Options::parse(matches)?;
    let http_opts = http::Options::parse(matches, &auth_opts.frontend_base_url)?;

    Ok(Action::Server(Args {
        port,
        dsn: SecretString::from(dsn),
        tenants: auth_opts.tenants,
        frontend_base_url: auth_opts.frontend_base_url,
        require_csrf: auth_opts.require_csrf,
        lockout: auth_opts.lockout,
        rate_limits: auth_opts.rate_limits,
        rate_limit_retention_seconds: auth_opts.rate_limit_retention_seconds,
        oauth_timeout_seconds: auth_opts.oauth_timeout_seconds,
        oauth_providers_file: auth_opts.oauth_providers_file,
        email_webhook_url: auth_opts.email_webhook_url,
        email_webhook_timeout_seconds: auth_opts.email_webhook_timeout_seconds,
        maintenance_poll_seconds: auth_opts.maintenance_poll_seconds,
        http: http_opts.into_config(),
    }))
}
