//! Credential flows: signup, login with progressive lockout, password reset
//! and email verification.

use anyhow::{Context, anyhow};
use base64ct::{Base64, Encoding};
use chrono::Duration;
use regex::Regex;
use tracing::{error, info, warn};

use super::{
    email::{password_reset_message, verification_message},
    error::AuthError,
    lockout::FailureOutcome,
    session::IssuedSession,
    state::AuthState,
};
use crate::{
    crypto::{self, PasswordHash, generate_secure_token, hash_secret},
    store::{InsertUserOutcome, UserRecord, UserTokenKind, UserTokenRecord},
    tenant::Tenant,
};

pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_PASSWORD_LENGTH: usize = 128;
const MAX_NAME_LENGTH: usize = 100;

#[derive(Clone, Debug)]
pub struct SignupInput {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

/// A user together with the session just issued for them.
#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub user: UserRecord,
    pub session: IssuedSession,
}

/// Normalize an email for lookup/uniqueness checks.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

fn validate_password(password: &str) -> Result<(), AuthError> {
    let length = password.chars().count();
    if length < MIN_PASSWORD_LENGTH {
        return Err(AuthError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    if length > MAX_PASSWORD_LENGTH {
        return Err(AuthError::Validation(format!(
            "Password must be at most {MAX_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}

fn validate_name(field: &str, value: &str) -> Result<String, AuthError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AuthError::Validation(format!("{field} is required")));
    }
    if trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(AuthError::Validation(format!("{field} is too long")));
    }
    Ok(trimmed.to_string())
}

fn validated_email(email: &str) -> Result<String, AuthError> {
    let email = normalize_email(email);
    if valid_email(&email) {
        Ok(email)
    } else {
        Err(AuthError::Validation("Invalid email address".to_string()))
    }
}

/// PBKDF2 is CPU-bound; keep it off the async workers.
async fn hash_password_blocking(password: &str) -> Result<PasswordHash, AuthError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || crypto::hash_password(&password, None))
        .await
        .context("password hashing task failed")
        .and_then(|result| result)
        .map_err(AuthError::Internal)
}

async fn verify_password_blocking(password: &str, stored: PasswordHash) -> Result<bool, AuthError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || crypto::verify_password(&password, &stored))
        .await
        .context("password verification task failed")
        .and_then(|result| result)
        .map_err(AuthError::Internal)
}

/// Spend the same derivation time as a real check so unknown emails are not
/// distinguishable by latency.
async fn dummy_password_check(password: &str) {
    let dummy = PasswordHash {
        hash: Base64::encode_string(&[0u8; 32]),
        salt: Base64::encode_string(&[0u8; crypto::SALT_LENGTH]),
    };
    let _ = verify_password_blocking(password, dummy).await;
}

/// Mint a single-use user token and return the raw value for the email link.
async fn issue_user_token(
    state: &AuthState,
    tenant: &Tenant,
    kind: UserTokenKind,
    user_id: &str,
    ttl_seconds: i64,
) -> anyhow::Result<String> {
    let token = generate_secure_token()?;
    let now = state.clock().now();
    let record = UserTokenRecord {
        token_hash: hash_secret(&token),
        user_id: user_id.to_string(),
        expires_at: now + Duration::seconds(ttl_seconds),
        created_at: now,
    };
    state.store().insert_user_token(tenant, kind, &record).await?;
    Ok(token)
}

async fn send_verification_email(state: &AuthState, tenant: &Tenant, user: &UserRecord) {
    let token = match issue_user_token(
        state,
        tenant,
        UserTokenKind::EmailVerification,
        &user.id,
        state.config().email_verification_ttl_seconds(),
    )
    .await
    {
        Ok(token) => token,
        Err(err) => {
            error!(tenant = %tenant, "Failed to create email verification token: {err:#}");
            return;
        }
    };
    let message = verification_message(&user.email, state.config().frontend_base_url(), &token);
    if let Err(err) = state.email().send(&message).await {
        warn!(tenant = %tenant, "Failed to send verification email: {err:#}");
    }
}

/// Create a user with a password and sign them in.
///
/// # Errors
/// Validation failures, `EmailTaken` for a registered email, or storage errors.
pub async fn signup(
    state: &AuthState,
    tenant: &Tenant,
    input: SignupInput,
) -> Result<AuthenticatedUser, AuthError> {
    let email = validated_email(&input.email)?;
    validate_password(&input.password)?;
    let first_name = validate_name("First name", &input.first_name)?;
    let last_name = validate_name("Last name", &input.last_name)?;

    let password = hash_password_blocking(&input.password).await?;
    let user = UserRecord {
        id: generate_secure_token().map_err(AuthError::Internal)?,
        email,
        first_name,
        last_name,
        password: Some(password),
        email_verified: false,
        failed_login_attempts: 0,
        locked_until: None,
        created_at: state.clock().now(),
    };

    if state.store().insert_user(tenant, &user).await? == InsertUserOutcome::Conflict {
        return Err(AuthError::EmailTaken);
    }
    info!(tenant = %tenant, user_id = %user.id, "User signed up");

    let session = state.sessions().create_session(tenant, &user.id).await?;
    send_verification_email(state, tenant, &user).await;
    Ok(AuthenticatedUser { user, session })
}

/// Authenticate with email and password.
///
/// Locked accounts are rejected before the password is looked at. A wrong
/// password advances the lockout counter and reports either the attempts left
/// before the next tier or the lock just applied.
///
/// # Errors
/// `InvalidCredentials`, `AccountLocked`, validation or storage errors.
pub async fn login(
    state: &AuthState,
    tenant: &Tenant,
    email: &str,
    password: &str,
) -> Result<AuthenticatedUser, AuthError> {
    let email = normalize_email(email);
    if email.is_empty() || password.is_empty() {
        return Err(AuthError::Validation(
            "Email and password are required".to_string(),
        ));
    }

    let Some(user) = state.store().find_user_by_email(tenant, &email).await? else {
        dummy_password_check(password).await;
        return Err(AuthError::InvalidCredentials {
            remaining_attempts: None,
        });
    };

    let now = state.clock().now();
    if let Some(until) = user.locked_until.filter(|until| *until > now) {
        return Err(AuthError::AccountLocked {
            retry_after_seconds: (until - now).num_seconds().max(1),
        });
    }

    let Some(stored) = user.password.clone() else {
        // OAuth-only account: there is no password to match.
        dummy_password_check(password).await;
        return Err(AuthError::InvalidCredentials {
            remaining_attempts: None,
        });
    };

    if verify_password_blocking(password, stored).await? {
        state.store().reset_failed_logins(tenant, &user.id).await?;
        let session = state.sessions().create_session(tenant, &user.id).await?;
        let user = UserRecord {
            failed_login_attempts: 0,
            locked_until: None,
            ..user
        };
        return Ok(AuthenticatedUser { user, session });
    }

    let failures = state
        .store()
        .record_failed_login(tenant, &user.id)
        .await?;
    match state.config().lockout().on_failure(failures) {
        FailureOutcome::Locked { duration_seconds } => {
            state
                .store()
                .lock_user(tenant, &user.id, now + Duration::seconds(duration_seconds))
                .await?;
            warn!(
                tenant = %tenant,
                user_id = %user.id,
                failures,
                duration_seconds,
                "Account locked after failed logins"
            );
            Err(AuthError::AccountLocked {
                retry_after_seconds: duration_seconds,
            })
        }
        FailureOutcome::Remaining(remaining_attempts) => {
            Err(AuthError::InvalidCredentials { remaining_attempts })
        }
    }
}

/// Email a reset link if the account exists. Always succeeds for valid input
/// so the response does not reveal whether the email is registered.
///
/// # Errors
/// Only for a malformed email address.
pub async fn request_password_reset(
    state: &AuthState,
    tenant: &Tenant,
    email: &str,
) -> Result<(), AuthError> {
    let email = validated_email(email)?;
    let user = match state.store().find_user_by_email(tenant, &email).await {
        Ok(Some(user)) => user,
        Ok(None) => return Ok(()),
        Err(err) => {
            error!(tenant = %tenant, "Password reset lookup failed: {err:#}");
            return Ok(());
        }
    };

    let token = match issue_user_token(
        state,
        tenant,
        UserTokenKind::PasswordReset,
        &user.id,
        state.config().password_reset_ttl_seconds(),
    )
    .await
    {
        Ok(token) => token,
        Err(err) => {
            error!(tenant = %tenant, "Failed to create password reset token: {err:#}");
            return Ok(());
        }
    };

    let message = password_reset_message(&user.email, state.config().frontend_base_url(), &token);
    if let Err(err) = state.email().send(&message).await {
        warn!(tenant = %tenant, "Failed to send password reset email: {err:#}");
    }
    Ok(())
}

/// Consume a reset token and set a new password.
///
/// Clears lockout state and ends every existing session of the user.
///
/// # Errors
/// `InvalidToken` for unknown, used or expired tokens; validation or storage errors.
pub async fn confirm_password_reset(
    state: &AuthState,
    tenant: &Tenant,
    token: &str,
    new_password: &str,
) -> Result<(), AuthError> {
    validate_password(new_password)?;
    if token.trim().is_empty() {
        return Err(AuthError::InvalidToken);
    }
    let user_id = state
        .store()
        .consume_user_token(
            tenant,
            UserTokenKind::PasswordReset,
            &hash_secret(token.trim()),
            state.clock().now(),
        )
        .await?
        .ok_or(AuthError::InvalidToken)?;

    let password = hash_password_blocking(new_password).await?;
    state
        .store()
        .update_password(tenant, &user_id, &password)
        .await?;
    let revoked = state.sessions().delete_user_sessions(tenant, &user_id).await?;
    info!(tenant = %tenant, user_id = %user_id, revoked, "Password reset completed");
    Ok(())
}

/// Consume a verification token and mark the email as verified.
///
/// # Errors
/// `InvalidToken` for unknown, used or expired tokens; storage errors.
pub async fn verify_email(state: &AuthState, tenant: &Tenant, token: &str) -> Result<(), AuthError> {
    if token.trim().is_empty() {
        return Err(AuthError::InvalidToken);
    }
    let user_id = state
        .store()
        .consume_user_token(
            tenant,
            UserTokenKind::EmailVerification,
            &hash_secret(token.trim()),
            state.clock().now(),
        )
        .await?
        .ok_or(AuthError::InvalidToken)?;
    state.store().mark_email_verified(tenant, &user_id).await?;
    info!(tenant = %tenant, user_id = %user_id, "Email verified");
    Ok(())
}

/// Load the user behind a validated session.
///
/// # Errors
/// Storage errors, or `Internal` when the session points at a missing user.
pub async fn load_user(
    state: &AuthState,
    tenant: &Tenant,
    user_id: &str,
) -> Result<UserRecord, AuthError> {
    state
        .store()
        .find_user_by_id(tenant, user_id)
        .await?
        .ok_or_else(|| AuthError::Internal(anyhow!("session references missing user {user_id}")))
}
