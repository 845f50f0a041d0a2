use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, ArgMatches, Command, builder::ValueParser};
use std::path::PathBuf;

use crate::{
    auth::{
        lockout::LockoutPolicy,
        rate_limit::{RateLimitRule, RateLimitRules},
    },
    tenant::Tenant,
};

pub const ARG_TENANTS: &str = "tenants";
pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_REQUIRE_CSRF: &str = "require-csrf";
pub const ARG_LOCKOUT_TIERS: &str = "lockout-tiers";
pub const ARG_RATE_LIMIT_LOGIN: &str = "rate-limit-login";
pub const ARG_RATE_LIMIT_SIGNUP: &str = "rate-limit-signup";
pub const ARG_RATE_LIMIT_SESSION: &str = "rate-limit-session";
pub const ARG_RATE_LIMIT_API: &str = "rate-limit-api";
pub const ARG_RATE_LIMIT_PASSWORD_RESET: &str = "rate-limit-password-reset";
pub const ARG_RATE_LIMIT_RETENTION: &str = "rate-limit-retention-seconds";
pub const ARG_OAUTH_TIMEOUT: &str = "oauth-timeout-seconds";
pub const ARG_OAUTH_PROVIDERS_FILE: &str = "oauth-providers-file";
pub const ARG_EMAIL_WEBHOOK_URL: &str = "email-webhook-url";
pub const ARG_EMAIL_WEBHOOK_TIMEOUT: &str = "email-webhook-timeout-seconds";
pub const ARG_MAINTENANCE_POLL: &str = "maintenance-poll-seconds";

pub fn with_args(command: Command) -> Command {
    let command = with_tenant_args(command);
    let command = with_protection_args(command);
    let command = with_rate_limit_args(command);
    with_integration_args(command)
}

fn tenant_parser() -> ValueParser {
    ValueParser::from(|value: &str| Tenant::parse(value.trim()).map_err(|err| err.to_string()))
}

fn rule_parser() -> ValueParser {
    ValueParser::from(|value: &str| value.parse::<RateLimitRule>().map_err(|err| format!("{err:#}")))
}

fn lockout_parser() -> ValueParser {
    ValueParser::from(|value: &str| value.parse::<LockoutPolicy>().map_err(|err| format!("{err:#}")))
}

fn with_tenant_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TENANTS)
                .short('t')
                .long("tenants")
                .help("Comma-separated tenant names served by this instance")
                .long_help(
                    "Comma-separated tenant names served by this instance. A request for acme.auth.example.com is served as tenant acme; hosts naming any other tenant get 404.",
                )
                .env("AUTHGATE_TENANTS")
                .value_delimiter(',')
                .value_parser(tenant_parser()),
        )
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long("frontend-base-url")
                .help("Frontend base URL used for email links")
                .env("AUTHGATE_FRONTEND_BASE_URL")
                .default_value("https://authgate.dev"),
        )
}

fn with_protection_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_REQUIRE_CSRF)
                .long("require-csrf")
                .help("Reject state-changing requests without a CSRF token")
                .env("AUTHGATE_REQUIRE_CSRF")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_LOCKOUT_TIERS)
                .long("lockout-tiers")
                .help("Lockout tiers as failures:seconds pairs")
                .env("AUTHGATE_LOCKOUT_TIERS")
                .default_value("3:300,5:900,7:3600,10:86400")
                .value_parser(lockout_parser()),
        )
}

fn with_rate_limit_args(command: Command) -> Command {
    let classes = [
        (ARG_RATE_LIMIT_LOGIN, "AUTHGATE_RATE_LIMIT_LOGIN", "5/900", "login"),
        (ARG_RATE_LIMIT_SIGNUP, "AUTHGATE_RATE_LIMIT_SIGNUP", "3/3600", "signup"),
        (ARG_RATE_LIMIT_SESSION, "AUTHGATE_RATE_LIMIT_SESSION", "60/60", "session"),
        (ARG_RATE_LIMIT_API, "AUTHGATE_RATE_LIMIT_API", "100/60", "general API"),
        (
            ARG_RATE_LIMIT_PASSWORD_RESET,
            "AUTHGATE_RATE_LIMIT_PASSWORD_RESET",
            "3/3600",
            "password reset",
        ),
    ];
    let command = classes
        .into_iter()
        .fold(command, |command, (name, env, default, class)| {
            command.arg(
                Arg::new(name)
                    .long(name)
                    .help(format!("Bucket for {class} requests as max/interval_seconds"))
                    .env(env)
                    .default_value(default)
                    .value_parser(rule_parser()),
            )
        });
    command.arg(
        Arg::new(ARG_RATE_LIMIT_RETENTION)
            .long("rate-limit-retention-seconds")
            .help("Idle buckets older than this are removed by maintenance")
            .env("AUTHGATE_RATE_LIMIT_RETENTION_SECONDS")
            .default_value("86400")
            .value_parser(clap::value_parser!(i64).range(1..)),
    )
}

fn with_integration_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_OAUTH_TIMEOUT)
                .long("oauth-timeout-seconds")
                .help("Timeout for calls to OAuth providers")
                .env("AUTHGATE_OAUTH_TIMEOUT_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_OAUTH_PROVIDERS_FILE)
                .long("oauth-providers-file")
                .help("JSON file of OAuth provider rows upserted per tenant at startup")
                .env("AUTHGATE_OAUTH_PROVIDERS_FILE")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new(ARG_EMAIL_WEBHOOK_URL)
                .long("email-webhook-url")
                .help("Notification endpoint that receives outgoing emails as JSON")
                .long_help(
                    "Notification endpoint that receives outgoing emails as JSON. When unset, emails are only logged.",
                )
                .env("AUTHGATE_EMAIL_WEBHOOK_URL"),
        )
        .arg(
            Arg::new(ARG_EMAIL_WEBHOOK_TIMEOUT)
                .long("email-webhook-timeout-seconds")
                .help("Timeout for email webhook calls")
                .env("AUTHGATE_EMAIL_WEBHOOK_TIMEOUT_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_MAINTENANCE_POLL)
                .long("maintenance-poll-seconds")
                .help("How often to check whether the cleanup pass is due")
                .env("AUTHGATE_MAINTENANCE_POLL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

#[derive(Debug)]
pub struct Options {
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
}

fn rule(matches: &ArgMatches, name: &str) -> Result<RateLimitRule> {
    matches
        .get_one::<RateLimitRule>(name)
        .copied()
        .with_context(|| format!("missing required argument: --{name}"))
}

impl Options {
    /// # Errors
    /// Returns an error if no tenant is configured or a value is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let tenants: Vec<Tenant> = matches
            .get_many::<Tenant>(ARG_TENANTS)
            .map(|tenants| tenants.cloned().collect())
            .unwrap_or_default();
        if tenants.is_empty() {
            bail!("missing required argument: --{ARG_TENANTS}");
        }

        let frontend_base_url = matches
            .get_one::<String>(ARG_FRONTEND_BASE_URL)
            .map(|url| url.trim_end_matches('/').to_string())
            .context("missing required argument: --frontend-base-url")?;

        let lockout = matches
            .get_one::<LockoutPolicy>(ARG_LOCKOUT_TIERS)
            .cloned()
            .unwrap_or_default();

        let rate_limits = RateLimitRules {
            login: rule(matches, ARG_RATE_LIMIT_LOGIN)?,
            signup: rule(matches, ARG_RATE_LIMIT_SIGNUP)?,
            session: rule(matches, ARG_RATE_LIMIT_SESSION)?,
            api: rule(matches, ARG_RATE_LIMIT_API)?,
            password_reset: rule(matches, ARG_RATE_LIMIT_PASSWORD_RESET)?,
        };

        Ok(Self {
            tenants,
            frontend_base_url,
            require_csrf: matches.get_flag(ARG_REQUIRE_CSRF),
            lockout,
            rate_limits,
            rate_limit_retention_seconds: matches
                .get_one::<i64>(ARG_RATE_LIMIT_RETENTION)
                .copied()
                .unwrap_or(86_400),
            oauth_timeout_seconds: matches
                .get_one::<u64>(ARG_OAUTH_TIMEOUT)
                .copied()
                .unwrap_or(10),
            oauth_providers_file: matches.get_one::<PathBuf>(ARG_OAUTH_PROVIDERS_FILE).cloned(),
            email_webhook_url: matches
                .get_one::<String>(ARG_EMAIL_WEBHOOK_URL)
                .filter(|url| !url.trim().is_empty())
                .cloned(),
            email_webhook_timeout_seconds: matches
                .get_one::<u64>(ARG_EMAIL_WEBHOOK_TIMEOUT)
                .copied()
                .unwrap_or(10),
            maintenance_poll_seconds: matches
                .get_one::<u64>(ARG_MAINTENANCE_POLL)
                .copied()
                .unwrap_or(3600),
        })
    }
}
