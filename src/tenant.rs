//! Tenant identifiers and host-based resolution.
//!
//! The tenant is the leftmost DNS label of the transport host. The resulting
//! value is used verbatim as a table-name prefix, so construction is the only
//! place it is validated: a `Tenant` always matches `^[a-z][a-z0-9_]{0,36}$`.
//! With the longest table suffix (`_email_verification_tokens`) that keeps
//! every name within Postgres' 63-byte identifier limit.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

const MAX_TENANT_LENGTH: usize = 37;

static TENANT_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(&format!("^[a-z][a-z0-9_]{{0,{}}}$", MAX_TENANT_LENGTH - 1)).ok()
});

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tenant(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TenantError {
    #[error("request host is missing")]
    MissingHost,
    #[error("invalid tenant identifier: {0}")]
    Invalid(String),
}

impl Tenant {
    /// Normalize and validate a tenant identifier.
    ///
    /// Identifiers are lowercased and `-` becomes `_` so DNS labels such as
    /// `acme-eu` map onto valid table prefixes.
    ///
    /// # Errors
    /// Returns `TenantError::Invalid` when the normalized value is not a safe prefix.
    pub fn parse(value: &str) -> Result<Self, TenantError> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        let valid = TENANT_PATTERN
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(&normalized));
        if valid {
            Ok(Self(normalized))
        } else {
            Err(TenantError::Invalid(value.to_string()))
        }
    }

    /// Resolve the tenant from a `Host` header value (port and IPv6 literals allowed).
    ///
    /// # Errors
    /// Returns an error for empty hosts or hosts whose leftmost label is not a valid tenant.
    pub fn from_host(host: &str) -> Result<Self, TenantError> {
        let host = host.trim();
        if host.is_empty() {
            return Err(TenantError::MissingHost);
        }
        let without_port = if host.starts_with('[') {
            host.split(']').next().map_or(host, |h| h.trim_start_matches('['))
        } else {
            host.split(':').next().unwrap_or(host)
        };
        let label = without_port.split('.').next().unwrap_or_default();
        if label.is_empty() {
            return Err(TenantError::MissingHost);
        }
        Self::parse(label)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of this tenant's copy of `table`.
    #[must_use]
    pub fn table(&self, table: &str) -> String {
        format!("{}_{table}", self.0)
    }
}

impl fmt::Display for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Tenant {
    type Err = TenantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_host_uses_leftmost_label() {
        assert_eq!(
            Tenant::from_host("acme.auth.example.com").map(|t| t.to_string()),
            Ok("acme".to_string())
        );
    }

    #[test]
    fn from_host_strips_port_and_normalizes() {
        assert_eq!(
            Tenant::from_host("Acme-EU.example.com:8443").map(|t| t.to_string()),
            Ok("acme_eu".to_string())
        );
        assert_eq!(
            Tenant::from_host("localhost:8080").map(|t| t.to_string()),
            Ok("localhost".to_string())
        );
    }

    #[test]
    fn from_host_rejects_unsafe_labels() {
        assert_eq!(Tenant::from_host(""), Err(TenantError::MissingHost));
        assert_eq!(Tenant::from_host(".example.com"), Err(TenantError::MissingHost));
        assert!(Tenant::from_host("1acme.example.com").is_err());
        assert!(Tenant::from_host("127.0.0.1").is_err());
        assert!(Tenant::from_host("[::1]:8080").is_err());
        assert!(Tenant::from_host("a;drop.example.com").is_err());
    }

    #[test]
    fn parse_enforces_length() {
        assert!(Tenant::parse(&"a".repeat(MAX_TENANT_LENGTH)).is_ok());
        assert!(Tenant::parse(&"a".repeat(MAX_TENANT_LENGTH + 1)).is_err());
    }

    #[test]
    fn longest_table_name_fits_postgres_identifiers() -> Result<(), TenantError> {
        let tenant = Tenant::parse(&"a".repeat(MAX_TENANT_LENGTH))?;
        assert_eq!(tenant.table("email_verification_tokens").len(), 63);
        assert!(tenant.table("sessions_created_at_idx").len() <= 63);
        Ok(())
    }

    #[test]
    fn table_prefixes_tenant() -> Result<(), TenantError> {
        let tenant: Tenant = "t1".parse()?;
        assert_eq!(tenant.table("users"), "t1_users");
        Ok(())
    }
}
