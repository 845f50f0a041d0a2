//! Auth handlers.
//!
//! Every handler runs behind the tenant gate, so it receives a resolved
//! [`RequestContext`](crate::api::middleware::RequestContext). The common
//! order is: rate-limit class, body parsing, CSRF (where applicable), then the
//! engine operation. Errors render through the shared envelope.
//!
//! ## Rate limit classes
//!
//! | Endpoint | Class |
//! |---|---|
//! | `signup` | `signup` |
//! | `login` | `login` |
//! | `session`, `logout`, `refresh` | `session` |
//! | `password-reset`, `password-reset/confirm` | `password_reset` |
//! | everything else | `api` |

pub(crate) mod csrf;
pub(crate) mod login;
pub(crate) mod oauth;
pub(crate) mod password_reset;
pub(crate) mod session;
pub(crate) mod signup;
pub(crate) mod types;
pub(crate) mod utils;
pub(crate) mod verification;
