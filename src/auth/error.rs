//! Domain errors and their stable client-facing classification.
//!
//! The HTTP layer only reads [`AuthError::status`], [`AuthError::code`] and the
//! display message. Wrapped `anyhow` causes are for logs and never reach clients.

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Malformed session token")]
    InvalidFormat,
    #[error("Session not found")]
    SessionNotFound,
    #[error("Invalid session secret")]
    InvalidSecret,
    #[error("session storage failure")]
    Storage(anyhow::Error),
}

impl From<anyhow::Error> for SessionError {
    fn from(err: anyhow::Error) -> Self {
        Self::Storage(err)
    }
}

impl SessionError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidFormat => "invalid_format",
            Self::SessionNotFound => "session_not_found",
            Self::InvalidSecret => "invalid_secret",
            Self::Storage(_) => "service_unavailable",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),
    #[error("Invalid email or password")]
    InvalidCredentials { remaining_attempts: Option<u32> },
    #[error("Account is temporarily locked")]
    AccountLocked { retry_after_seconds: i64 },
    #[error("Email is already registered")]
    EmailTaken,
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("Missing or invalid session")]
    MissingSession,
    #[error("Invalid or expired CSRF token")]
    InvalidCsrfToken,
    #[error("Origin not allowed")]
    OriginNotAllowed,
    #[error("Too many requests")]
    RateLimited { retry_after_seconds: i64 },
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Unknown tenant")]
    UnknownTenant,
    #[error("Unknown OAuth provider")]
    UnknownProvider,
    #[error("OAuth authentication failed")]
    OAuthFailed,
    #[error("Service temporarily unavailable")]
    Storage(anyhow::Error),
    #[error("Internal server error")]
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        Self::Storage(err)
    }
}

impl AuthError {
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::InvalidToken => 400,
            Self::InvalidCredentials { .. } | Self::MissingSession | Self::OAuthFailed => 401,
            Self::Session(SessionError::Storage(_)) | Self::Storage(_) => 503,
            Self::Session(_) => 401,
            Self::InvalidCsrfToken | Self::OriginNotAllowed => 403,
            Self::UnknownTenant | Self::UnknownProvider => 404,
            Self::EmailTaken => 409,
            Self::AccountLocked { .. } => 423,
            Self::RateLimited { .. } => 429,
            Self::Internal(_) => 500,
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::InvalidCredentials { .. } => "invalid_credentials",
            Self::AccountLocked { .. } => "account_locked",
            Self::EmailTaken => "email_taken",
            Self::Session(err) => err.code(),
            Self::MissingSession => "missing_session",
            Self::InvalidCsrfToken => "invalid_csrf_token",
            Self::OriginNotAllowed => "origin_not_allowed",
            Self::RateLimited { .. } => "rate_limited",
            Self::InvalidToken => "invalid_token",
            Self::UnknownTenant => "unknown_tenant",
            Self::UnknownProvider => "unknown_provider",
            Self::OAuthFailed => "oauth_failed",
            Self::Storage(_) => "service_unavailable",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Message safe to show a client. Storage causes are replaced by a generic text.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Session(SessionError::Storage(_)) => {
                "Service temporarily unavailable".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Underlying cause for server-side logging, if any.
    #[must_use]
    pub fn cause(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Storage(err) | Self::Internal(err) | Self::Session(SessionError::Storage(err)) => {
                Some(err)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn statuses_follow_taxonomy() {
        assert_eq!(AuthError::Validation("bad".into()).status(), 400);
        assert_eq!(
            AuthError::InvalidCredentials {
                remaining_attempts: Some(2)
            }
            .status(),
            401
        );
        assert_eq!(AuthError::from(SessionError::InvalidSecret).status(), 401);
        assert_eq!(AuthError::InvalidCsrfToken.status(), 403);
        assert_eq!(AuthError::EmailTaken.status(), 409);
        assert_eq!(
            AuthError::AccountLocked {
                retry_after_seconds: 300
            }
            .status(),
            423
        );
        assert_eq!(
            AuthError::RateLimited {
                retry_after_seconds: 1
            }
            .status(),
            429
        );
        assert_eq!(AuthError::Storage(anyhow!("down")).status(), 503);
        assert_eq!(AuthError::Internal(anyhow!("boom")).status(), 500);
    }

    #[test]
    fn storage_causes_are_not_exposed() {
        let err = AuthError::from(SessionError::Storage(anyhow!("connection refused to 10.0.0.5")));
        assert_eq!(err.status(), 503);
        assert_eq!(err.public_message(), "Service temporarily unavailable");
        assert!(
            !AuthError::Storage(anyhow!("password=hunter2"))
                .public_message()
                .contains("hunter2")
        );
    }

    #[test]
    fn session_codes_are_stable() {
        assert_eq!(
            AuthError::from(SessionError::InvalidFormat).code(),
            "invalid_format"
        );
        assert_eq!(
            AuthError::from(SessionError::SessionNotFound).code(),
            "session_not_found"
        );
        assert_eq!(
            AuthError::from(SessionError::InvalidSecret).code(),
            "invalid_secret"
        );
    }
}
