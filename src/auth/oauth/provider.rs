//! Provider registry: configuration rows resolved into [`OAuthProvider`]s.
//!
//! New providers are data. A row may carry its own endpoints; rows without
//! them fall back to the well-known template for their name.

use serde_json::Value;
use url::Url;

use super::OAuthError;
use crate::store::OAuthProviderRecord;

/// User identity as every provider is reduced to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedUserInfo {
    pub provider_user_id: String,
    pub email: String,
    pub email_verified: bool,
    pub first_name: String,
    pub last_name: String,
}

pub trait OAuthProvider: Send + Sync {
    fn name(&self) -> &str;
    fn authorize_url(&self) -> &str;
    fn token_url(&self) -> &str;
    fn user_info_url(&self) -> &str;
    fn default_scopes(&self) -> &[&'static str];

    /// Reduce a provider's user-info document to a [`NormalizedUserInfo`].
    ///
    /// # Errors
    /// Returns an error when the id or email is missing.
    fn normalize_user_info(&self, raw: &Value) -> Result<NormalizedUserInfo, OAuthError> {
        normalize_user_info(raw)
    }
}

struct WellKnown {
    name: &'static str,
    authorize_url: &'static str,
    token_url: &'static str,
    user_info_url: &'static str,
    scopes: &'static [&'static str],
}

const WELL_KNOWN: &[WellKnown] = &[
    WellKnown {
        name: "google",
        authorize_url: "https://accounts.google.com/o/oauth2/v2/auth",
        token_url: "https://oauth2.googleapis.com/token",
        user_info_url: "https://openidconnect.googleapis.com/v1/userinfo",
        scopes: &["openid", "email", "profile"],
    },
    WellKnown {
        name: "github",
        authorize_url: "https://github.com/login/oauth/authorize",
        token_url: "https://github.com/login/oauth/access_token",
        user_info_url: "https://api.github.com/user",
        scopes: &["read:user", "user:email"],
    },
    WellKnown {
        name: "microsoft",
        authorize_url: "https://login.microsoftonline.com/common/oauth2/v2.0/authorize",
        token_url: "https://login.microsoftonline.com/common/oauth2/v2.0/token",
        user_info_url: "https://graph.microsoft.com/oidc/userinfo",
        scopes: &["openid", "email", "profile"],
    },
    WellKnown {
        name: "discord",
        authorize_url: "https://discord.com/oauth2/authorize",
        token_url: "https://discord.com/api/oauth2/token",
        user_info_url: "https://discord.com/api/users/@me",
        scopes: &["identify", "email"],
    },
];

/// A provider built from a tenant configuration row.
#[derive(Clone, Debug)]
pub struct ConfiguredProvider {
    name: String,
    authorize_url: String,
    token_url: String,
    user_info_url: String,
    default_scopes: &'static [&'static str],
}

impl ConfiguredProvider {
    /// Resolve endpoints from the row, falling back to the built-in template.
    ///
    /// # Errors
    /// Returns `OAuthError::MissingEndpoints` when neither source provides all three URLs.
    pub fn from_record(record: &OAuthProviderRecord) -> Result<Self, OAuthError> {
        let template = WELL_KNOWN.iter().find(|known| known.name == record.name);
        let endpoint = |own: &Option<String>, fallback: Option<&'static str>| {
            own.clone()
                .filter(|url| !url.trim().is_empty())
                .or_else(|| fallback.map(str::to_string))
                .ok_or_else(|| OAuthError::MissingEndpoints(record.name.clone()))
        };
        Ok(Self {
            name: record.name.clone(),
            authorize_url: endpoint(&record.authorize_url, template.map(|t| t.authorize_url))?,
            token_url: endpoint(&record.token_url, template.map(|t| t.token_url))?,
            user_info_url: endpoint(&record.user_info_url, template.map(|t| t.user_info_url))?,
            default_scopes: template.map(|t| t.scopes).unwrap_or(&[]),
        })
    }
}

impl OAuthProvider for ConfiguredProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn authorize_url(&self) -> &str {
        &self.authorize_url
    }

    fn token_url(&self) -> &str {
        &self.token_url
    }

    fn user_info_url(&self) -> &str {
        &self.user_info_url
    }

    fn default_scopes(&self) -> &[&'static str] {
        self.default_scopes
    }
}

/// Build the provider redirect carrying `state`.
///
/// The row's `scope` wins over the provider defaults.
///
/// # Errors
/// Returns an error if the authorize endpoint is not a valid URL.
pub fn build_authorization_url(
    provider: &dyn OAuthProvider,
    record: &OAuthProviderRecord,
    state: &str,
) -> Result<Url, OAuthError> {
    let mut url = Url::parse(provider.authorize_url())
        .map_err(|err| OAuthError::InvalidEndpoint(format!("{}: {err}", provider.name())))?;
    let scope = record
        .scope
        .as_deref()
        .map(str::trim)
        .filter(|scope| !scope.is_empty())
        .map_or_else(|| provider.default_scopes().join(" "), str::to_string);
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &record.client_id)
        .append_pair("redirect_uri", &record.redirect_uri)
        .append_pair("scope", &scope)
        .append_pair("state", state);
    Ok(url)
}

fn string_field(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match raw.get(*key) {
        Some(Value::String(value)) if !value.trim().is_empty() => Some(value.trim().to_string()),
        Some(Value::Number(value)) => Some(value.to_string()),
        _ => None,
    })
}

/// Generic normalizer covering OIDC-style and GitHub/Discord-style documents.
///
/// # Errors
/// Returns `OAuthError::MissingUserField` for documents without an id or email.
pub fn normalize_user_info(raw: &Value) -> Result<NormalizedUserInfo, OAuthError> {
    let provider_user_id =
        string_field(raw, &["sub", "id"]).ok_or(OAuthError::MissingUserField("id"))?;
    let email = string_field(raw, &["email", "mail"])
        .map(|email| email.to_lowercase())
        .ok_or(OAuthError::MissingUserField("email"))?;
    let email_verified = ["email_verified", "verified"]
        .iter()
        .find_map(|key| raw.get(*key).and_then(Value::as_bool))
        .unwrap_or(false);

    let (first_name, last_name) = match (
        string_field(raw, &["given_name"]),
        string_field(raw, &["family_name"]),
    ) {
        (Some(first), last) => (first, last.unwrap_or_default()),
        (None, _) => {
            let display = string_field(raw, &["name", "global_name", "username", "login"])
                .unwrap_or_default();
            match display.split_once(' ') {
                Some((first, last)) => (first.to_string(), last.trim().to_string()),
                None => (display, String::new()),
            }
        }
    };

    Ok(NormalizedUserInfo {
        provider_user_id,
        email,
        email_verified,
        first_name,
        last_name,
    })
}
