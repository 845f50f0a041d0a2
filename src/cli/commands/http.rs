use anyhow::Result;
use axum::http::HeaderValue;
use clap::{Arg, ArgAction, ArgMatches, Command};

use crate::api::{HttpConfig, origin_of};

pub const ARG_ALLOWED_ORIGINS: &str = "allowed-origins";
pub const ARG_CORS_PERMISSIVE: &str = "cors-permissive";
pub const ARG_TRUST_FORWARDED_FOR: &str = "trust-forwarded-for";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ALLOWED_ORIGINS)
                .long("allowed-origins")
                .help("Comma-separated origins allowed to call the API")
                .long_help(
                    "Comma-separated origins allowed to call the API. Defaults to the origin of --frontend-base-url.",
                )
                .env("AUTHGATE_ALLOWED_ORIGINS")
                .value_delimiter(','),
        )
        .arg(
            Arg::new(ARG_CORS_PERMISSIVE)
                .long("cors-permissive")
                .help("Accept any origin (development only)")
                .env("AUTHGATE_CORS_PERMISSIVE")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_TRUST_FORWARDED_FOR)
                .long("trust-forwarded-for")
                .help("Use X-Forwarded-For as the client address (behind a trusted proxy)")
                .env("AUTHGATE_TRUST_FORWARDED_FOR")
                .action(ArgAction::SetTrue),
        )
}

#[derive(Debug)]
pub struct Options {
    pub allowed_origins: Vec<HeaderValue>,
    pub cors_permissive: bool,
    pub trust_forwarded_for: bool,
}

impl Options {
    /// `frontend_base_url` supplies the origin when none are configured.
    ///
    /// # Errors
    /// Returns an error if an origin is not a valid URL.
    pub fn parse(matches: &ArgMatches, frontend_base_url: &str) -> Result<Self> {
        let configured: Vec<&String> = matches
            .get_many::<String>(ARG_ALLOWED_ORIGINS)
            .map(Iterator::collect)
            .unwrap_or_default();
        let allowed_origins = if configured.is_empty() {
            vec![origin_of(frontend_base_url)?]
        } else {
            configured
                .into_iter()
                .map(|origin| origin.trim())
                .filter(|origin| !origin.is_empty())
                .map(origin_of)
                .collect::<Result<Vec<_>>>()?
        };

        Ok(Self {
            allowed_origins,
            cors_permissive: matches.get_flag(ARG_CORS_PERMISSIVE),
            trust_forwarded_for: matches.get_flag(ARG_TRUST_FORWARDED_FOR),
        })
    }

    #[must_use]
    pub fn into_config(self) -> HttpConfig {
        HttpConfig::new(self.allowed_origins)
            .with_cors_permissive(self.cors_permissive)
            .with_trust_forwarded_for(self.trust_forwarded_for)
    }
}
