//! Authentication engine.
//!
//! Nothing in here knows about HTTP. Every operation takes the resolved
//! [`Tenant`](crate::tenant::Tenant) and an [`AuthState`], and reports failures
//! as [`AuthError`] so the API layer can render one uniform envelope.

pub mod clock;
pub mod credentials;
pub mod csrf;
pub mod email;
pub mod error;
pub mod lockout;
pub mod maintenance;
pub mod oauth;
pub mod rate_limit;
pub mod session;
pub mod state;

pub use error::{AuthError, SessionError};
pub use state::{AuthConfig, AuthState};

#[cfg(test)]
pub(crate) mod test_support;
