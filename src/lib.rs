//! # Authgate (Multi-tenant Authentication Service)
//!
//! `authgate` serves login, sessions, CSRF tokens, rate limiting, progressive
//! account lockout, password reset, email verification and OAuth single sign-on
//! for any number of independent tenants from one deployable unit.
//!
//! ## Tenant Model
//!
//! A tenant is derived from the leftmost label of the request `Host`
//! (`acme.auth.example.com` → `acme`). Every tenant owns its own table set
//! (`acme_users`, `acme_sessions`, ...), so isolation is structural rather
//! than a `WHERE` clause. The tenant is resolved once at the request boundary
//! and passed explicitly to every component; request bodies never select it.
//!
//! ## Sessions
//!
//! A session token is `{id}.{secret}` where both halves are 24 characters from
//! an unambiguous 32-symbol alphabet. Only a SHA-256 hash of the secret is
//! persisted and comparisons are constant-time. Sessions live for 24 hours.
//!
//! ## Statelessness
//!
//! Nothing is cached in-process between requests: rate-limit buckets, lockout
//! counters, one-time tokens and OAuth state all live in the store, which makes
//! any number of instances interchangeable.

pub mod api;
pub mod auth;
pub mod cli;
pub mod crypto;
pub mod store;
pub mod tenant;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
