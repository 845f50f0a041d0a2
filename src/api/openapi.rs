use super::handlers::{auth, health};
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Every documented route. The server wires the two halves separately so the
/// tenant gate only wraps `/auth/*`.
pub(crate) fn api_router() -> OpenApiRouter {
    let mut router = OpenApiRouter::with_openapi(cargo_openapi())
        .merge(health_router())
        .merge(auth_router());

    let mut health_tag = Tag::new("health");
    health_tag.description = Some("Liveness and build information".to_string());
    let mut auth_tag = Tag::new("auth");
    auth_tag.description =
        Some("Signup, login, sessions, CSRF, password reset and verification".to_string());
    let mut oauth_tag = Tag::new("oauth");
    oauth_tag.description = Some("OAuth single sign-on".to_string());
    router.get_openapi_mut().tags = Some(vec![health_tag, auth_tag, oauth_tag]);

    router
}

pub(crate) fn health_router() -> OpenApiRouter {
    OpenApiRouter::new().routes(routes!(health::health))
}

pub(crate) fn auth_router() -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(auth::signup::signup))
        .routes(routes!(auth::login::login))
        .routes(routes!(auth::session::logout))
        .routes(routes!(auth::session::session))
        .routes(routes!(auth::session::refresh))
        .routes(routes!(auth::csrf::csrf_token))
        .routes(routes!(auth::password_reset::request_reset))
        .routes(routes!(auth::password_reset::confirm_reset))
        .routes(routes!(auth::verification::verify_email))
        .routes(routes!(auth::oauth::authorize))
        .routes(routes!(auth::oauth::callback))
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(non_empty(env!("CARGO_PKG_DESCRIPTION")))
        .build();
    info.contact = cargo_contact(env!("CARGO_PKG_AUTHORS"));
    info.license = non_empty(env!("CARGO_PKG_LICENSE")).map(|identifier| {
        let mut license = License::new(identifier);
        license.identifier = Some(identifier.to_string());
        license
    });
    OpenApiBuilder::new().info(info).build()
}

fn non_empty(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// First Cargo author, `Name <email>` or a bare name.
fn cargo_contact(authors: &str) -> Option<Contact> {
    let primary = authors.split(':').next()?.trim();
    let (name, email) = match primary.split_once('<') {
        Some((name, email)) => (name.trim(), email.trim_end_matches('>').trim()),
        None => (primary, ""),
    };
    if name.is_empty() && email.is_empty() {
        return None;
    }
    let mut contact = Contact::new();
    contact.name = (!name.is_empty()).then(|| name.to_string());
    contact.email = (!email.is_empty()).then(|| email.to_string());
    Some(contact)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_info_from_cargo() {
        let spec = openapi();
        assert_eq!(spec.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(spec.info.version, env!("CARGO_PKG_VERSION"));
        let contact = spec.info.contact.unwrap_or_default();
        assert_eq!(contact.name.as_deref(), Some("Team Authgate"));
        assert_eq!(contact.email.as_deref(), Some("team@authgate.dev"));
        assert_eq!(
            spec.info.license.map(|license| license.name).as_deref(),
            Some("BSD-3-Clause")
        );
    }

    #[test]
    fn openapi_documents_every_route() {
        let spec = openapi();
        for path in [
            "/health",
            "/auth/signup",
            "/auth/login",
            "/auth/logout",
            "/auth/session",
            "/auth/refresh",
            "/auth/csrf-token",
            "/auth/password-reset",
            "/auth/password-reset/confirm",
            "/auth/verify-email",
            "/auth/oauth/authorize",
            "/auth/oauth/{provider}/callback",
        ] {
            assert!(spec.paths.paths.contains_key(path), "{path} missing");
        }
        let tags = spec.tags.unwrap_or_default();
        assert!(tags.iter().any(|tag| tag.name == "oauth"));
    }

    #[test]
    fn contact_parsing_handles_bare_names() {
        let contact = cargo_contact("Jane Doe").unwrap_or_default();
        assert_eq!(contact.name.as_deref(), Some("Jane Doe"));
        assert!(contact.email.is_none());
        assert!(cargo_contact("").is_none());
    }
}
