//! HTTP tests driving the full router over the memory store.

use anyhow::{Context, Result};
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{
        HeaderMap, HeaderValue, Request, StatusCode,
        header::{AUTHORIZATION, CONTENT_TYPE, HOST, LOCATION, ORIGIN, RETRY_AFTER},
    },
};
use chrono::Duration;
use regex::Regex;
use serde_json::{Value, json};
use tower::ServiceExt;

use crate::{
    api::{HttpConfig, app},
    auth::{
        AuthConfig,
        test_support::{FRONTEND, FakeProvider, GOOD_CODE, Harness},
    },
    store::AuthStore,
};

const HOST_T1: &str = "t1.auth.example.com";
const PASSWORD: &str = "Secret123!";

struct TestApp {
    harness: Harness,
    router: Router,
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

impl TestApp {
    async fn new() -> Result<Self> {
        Self::with(|config| config, |http| http).await
    }

    async fn with(
        config: impl FnOnce(AuthConfig) -> AuthConfig,
        http: impl FnOnce(HttpConfig) -> HttpConfig,
    ) -> Result<Self> {
        let harness = Harness::with_config(config).await?;
        let http = http(HttpConfig::new(vec![HeaderValue::from_static(FRONTEND)]));
        let router = app(harness.state.clone(), http);
        Ok(Self { harness, router })
    }

    async fn send(&self, request: Request<Body>) -> Result<Reply> {
        let response = self.router.clone().oneshot(request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).context("response body is not JSON")?
        };
        Ok(Reply {
            status,
            headers,
            body,
        })
    }

    async fn post(&self, path: &str, body: Value) -> Result<Reply> {
        self.send(post_json(path, &body)?).await
    }

    async fn get(&self, path: &str) -> Result<Reply> {
        self.send(get(path)?).await
    }

    async fn signup(&self, email: &str) -> Result<Reply> {
        self.post(
            "/auth/signup",
            json!({"email": email, "password": PASSWORD, "firstName": "A", "lastName": "B"}),
        )
        .await
    }

    async fn login(&self, email: &str, password: &str) -> Result<Reply> {
        self.post("/auth/login", json!({"email": email, "password": password}))
            .await
    }
}

fn post_json(path: &str, body: &Value) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method("POST")
        .uri(path)
        .header(HOST, HOST_T1)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))?)
}

fn get(path: &str) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method("GET")
        .uri(path)
        .header(HOST, HOST_T1)
        .body(Body::empty())?)
}

fn with_bearer(mut request: Request<Body>, token: &str) -> Result<Request<Body>> {
    request
        .headers_mut()
        .insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {token}"))?);
    Ok(request)
}

fn session_token(reply: &Reply) -> Result<String> {
    reply.body["session"]["token"]
        .as_str()
        .map(str::to_string)
        .context("response carries no session token")
}

#[tokio::test]
async fn health_reports_store_state() -> Result<()> {
    let test = TestApp::new().await?;
    let reply = test.send(Request::get("/health").body(Body::empty())?).await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["store"], "ok");
    assert_eq!(reply.body["name"], env!("CARGO_PKG_NAME"));
    assert!(reply.headers.contains_key("x-app"));
    assert!(reply.headers.contains_key("x-request-id"));

    test.harness.store.set_unavailable(true);
    let reply = test.send(Request::get("/health").body(Body::empty())?).await?;
    assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(reply.body["store"], "error");
    Ok(())
}

#[tokio::test]
async fn request_id_is_propagated() -> Result<()> {
    let test = TestApp::new().await?;
    let mut request = get("/auth/csrf-token")?;
    request
        .headers_mut()
        .insert("x-request-id", HeaderValue::from_static("req-123"));
    let reply = test.send(request).await?;
    assert_eq!(
        reply.headers.get("x-request-id").and_then(|v| v.to_str().ok()),
        Some("req-123")
    );
    Ok(())
}

#[tokio::test]
async fn unknown_tenant_is_not_found() -> Result<()> {
    let test = TestApp::new().await?;
    let request = Request::get("/auth/csrf-token")
        .header(HOST, "intruder.auth.example.com")
        .body(Body::empty())?;
    let reply = test.send(request).await?;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.body["success"], false);
    assert_eq!(reply.body["status"], 404);
    assert_eq!(reply.body["code"], "unknown_tenant");
    Ok(())
}

#[tokio::test]
async fn unmatched_routes_use_the_envelope() -> Result<()> {
    let test = TestApp::new().await?;
    let reply = test.get("/auth/nope").await?;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.body["status"], 404);

    let reply = test.get("/auth/login").await?;
    assert_eq!(reply.status, StatusCode::METHOD_NOT_ALLOWED);
    Ok(())
}

#[tokio::test]
async fn signup_returns_user_and_session() -> Result<()> {
    let test = TestApp::new().await?;
    let reply = test.signup("a@x.com").await?;
    assert_eq!(reply.status, StatusCode::CREATED);
    assert_eq!(reply.body["success"], true);
    assert!(reply.body["user"]["id"].as_str().is_some());
    assert_eq!(reply.body["user"]["emailVerified"], false);
    let token = session_token(&reply)?;
    assert!(Regex::new(r"^[a-z2-9]{24}\.[a-z2-9]{24}$")?.is_match(&token));

    let reply = test.signup("a@x.com").await?;
    assert_eq!(reply.status, StatusCode::CONFLICT);
    assert_eq!(reply.body["code"], "email_taken");
    Ok(())
}

#[tokio::test]
async fn malformed_body_is_a_validation_error() -> Result<()> {
    let test = TestApp::new().await?;
    let request = Request::post("/auth/login")
        .header(HOST, HOST_T1)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))?;
    let reply = test.send(request).await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["code"], "validation_error");
    Ok(())
}

#[tokio::test]
async fn login_lockout_over_http() -> Result<()> {
    let test = TestApp::new().await?;
    test.signup("a@x.com").await?;

    let reply = test.login("a@x.com", "wrong-pass").await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["remainingAttempts"], 2);
    let reply = test.login("a@x.com", "wrong-pass").await?;
    assert_eq!(reply.body["remainingAttempts"], 1);

    let reply = test.login("a@x.com", "wrong-pass").await?;
    assert_eq!(reply.status, StatusCode::LOCKED);
    assert_eq!(reply.body["retryAfterSeconds"], 300);
    assert_eq!(reply.body["code"], "account_locked");

    let reply = test.login("a@x.com", "wrong-pass").await?;
    assert_eq!(reply.status, StatusCode::LOCKED);
    let reply = test.login("a@x.com", PASSWORD).await?;
    assert_eq!(reply.status, StatusCode::LOCKED);
    Ok(())
}

#[tokio::test]
async fn sixth_login_in_window_is_rate_limited() -> Result<()> {
    let test = TestApp::new().await?;
    for _ in 0..5 {
        let reply = test.login("ghost@x.com", "wrong-pass").await?;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    }
    let reply = test.login("ghost@x.com", "wrong-pass").await?;
    assert_eq!(reply.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(reply.body["retryAfterSeconds"], 900);
    assert_eq!(
        reply.headers.get(RETRY_AFTER).and_then(|v| v.to_str().ok()),
        Some("900")
    );

    test.harness.clock.advance(Duration::seconds(900));
    let reply = test.login("ghost@x.com", "wrong-pass").await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn trusted_forwarded_for_separates_clients() -> Result<()> {
    let test = TestApp::with(|config| config, |http| http.with_trust_forwarded_for(true)).await?;
    let attempt = |ip: &'static str| -> Result<Request<Body>> {
        let mut request = post_json(
            "/auth/login",
            &json!({"email": "ghost@x.com", "password": "wrong-pass"}),
        )?;
        request
            .headers_mut()
            .insert("x-forwarded-for", HeaderValue::from_static(ip));
        Ok(request)
    };
    for _ in 0..5 {
        test.send(attempt("203.0.113.1")?).await?;
    }
    let limited = test.send(attempt("203.0.113.1")?).await?;
    assert_eq!(limited.status, StatusCode::TOO_MANY_REQUESTS);
    let other = test.send(attempt("203.0.113.2")?).await?;
    assert_eq!(other.status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn session_lifecycle_over_http() -> Result<()> {
    let test = TestApp::new().await?;
    let token = session_token(&test.signup("a@x.com").await?)?;

    let reply = test.send(with_bearer(get("/auth/session")?, &token)?).await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["user"]["email"], "a@x.com");
    assert!(reply.body["session"].get("token").is_none());

    let reply = test
        .send(with_bearer(post_json("/auth/refresh", &Value::Null)?, &token)?)
        .await?;
    assert_eq!(reply.status, StatusCode::OK);
    let refreshed = session_token(&reply)?;
    assert_ne!(refreshed, token);

    let reply = test.send(with_bearer(get("/auth/session")?, &token)?).await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["code"], "session_not_found");

    let reply = test
        .send(with_bearer(post_json("/auth/logout", &Value::Null)?, &refreshed)?)
        .await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["success"], true);

    let reply = test.send(with_bearer(get("/auth/session")?, &refreshed)?).await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn session_errors_are_typed() -> Result<()> {
    let test = TestApp::new().await?;
    let reply = test.get("/auth/session").await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["code"], "missing_session");

    let reply = test.send(with_bearer(get("/auth/session")?, "garbage")?).await?;
    assert_eq!(reply.body["code"], "invalid_format");

    let token = session_token(&test.signup("a@x.com").await?)?;
    let (id, _) = token.split_once('.').context("token has no separator")?;
    let forged = format!("{id}.{}", "a".repeat(24));
    let reply = test.send(with_bearer(get("/auth/session")?, &forged)?).await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["code"], "invalid_secret");

    test.harness.store.set_unavailable(true);
    let reply = test.send(with_bearer(get("/auth/session")?, &token)?).await?;
    assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
    Ok(())
}

#[tokio::test]
async fn required_csrf_tokens_are_single_use() -> Result<()> {
    let test = TestApp::with(|config| config.with_require_csrf(true), |http| http).await?;

    let reply = test.signup("a@x.com").await?;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.body["code"], "invalid_csrf_token");

    let csrf = test.get("/auth/csrf-token").await?;
    let csrf_token = csrf.body["csrfToken"]
        .as_str()
        .context("missing csrfToken")?
        .to_string();
    let body = json!({
        "email": "a@x.com",
        "password": PASSWORD,
        "firstName": "A",
        "lastName": "B",
        "csrfToken": csrf_token
    });
    let reply = test.post("/auth/signup", body.clone()).await?;
    assert_eq!(reply.status, StatusCode::CREATED);

    let mut request = post_json("/auth/login", &json!({"email": "a@x.com", "password": PASSWORD}))?;
    request
        .headers_mut()
        .insert("x-csrf-token", HeaderValue::from_str(&csrf_token)?);
    let reply = test.send(request).await?;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn presented_csrf_token_is_checked_even_when_optional() -> Result<()> {
    let test = TestApp::new().await?;
    let reply = test
        .post(
            "/auth/login",
            json!({"email": "a@x.com", "password": PASSWORD, "csrfToken": "forged"}),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn cross_origin_writes_are_rejected() -> Result<()> {
    let test = TestApp::new().await?;
    let mut request = post_json("/auth/login", &json!({"email": "a@x.com", "password": "x"}))?;
    request
        .headers_mut()
        .insert(ORIGIN, HeaderValue::from_static("https://evil.example.net"));
    let reply = test.send(request).await?;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.body["code"], "origin_not_allowed");

    let mut request = post_json("/auth/login", &json!({"email": "a@x.com", "password": "x"}))?;
    request
        .headers_mut()
        .insert(ORIGIN, HeaderValue::from_static(FRONTEND));
    let reply = test.send(request).await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);

    let permissive =
        TestApp::with(|config| config, |http| http.with_cors_permissive(true)).await?;
    let mut request = post_json("/auth/login", &json!({"email": "a@x.com", "password": "x"}))?;
    request
        .headers_mut()
        .insert(ORIGIN, HeaderValue::from_static("https://evil.example.net"));
    let reply = permissive.send(request).await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn password_reset_request_does_not_reveal_accounts() -> Result<()> {
    let test = TestApp::new().await?;
    test.signup("a@x.com").await?;
    let unknown = test
        .post("/auth/password-reset", json!({"email": "ghost@x.com"}))
        .await?;
    let known = test
        .post("/auth/password-reset", json!({"email": "a@x.com"}))
        .await?;
    assert_eq!(unknown.status, StatusCode::OK);
    assert_eq!(known.status, StatusCode::OK);
    assert_eq!(known.body, unknown.body);
    Ok(())
}

#[tokio::test]
async fn password_reset_flow_over_http() -> Result<()> {
    let test = TestApp::new().await?;
    let token = session_token(&test.signup("a@x.com").await?)?;
    let reply = test
        .post("/auth/password-reset", json!({"email": "a@x.com"}))
        .await?;
    assert_eq!(reply.status, StatusCode::OK);

    let reset_token = test.harness.emails.last_token().context("no reset email")?;
    let reply = test
        .post(
            "/auth/password-reset/confirm",
            json!({"token": reset_token, "password": "N3w-password"}),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::OK);

    let reply = test.send(with_bearer(get("/auth/session")?, &token)?).await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);

    let reply = test
        .post(
            "/auth/password-reset/confirm",
            json!({"token": reset_token, "password": "N3w-password"}),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["code"], "invalid_token");
    Ok(())
}

#[tokio::test]
async fn verify_email_over_http() -> Result<()> {
    let test = TestApp::new().await?;
    let token = session_token(&test.signup("a@x.com").await?)?;
    let verification = test.harness.emails.last_token().context("no verification email")?;

    let reply = test
        .post("/auth/verify-email", json!({"token": verification}))
        .await?;
    assert_eq!(reply.status, StatusCode::OK);

    let reply = test.send(with_bearer(get("/auth/session")?, &token)?).await?;
    assert_eq!(reply.body["user"]["emailVerified"], true);
    Ok(())
}

#[tokio::test]
async fn oauth_round_trip_over_http() -> Result<()> {
    let test = TestApp::new().await?;
    let provider = FakeProvider::spawn().await?;
    test.harness
        .store
        .upsert_oauth_provider(&test.harness.tenant, &provider.record("google"))
        .await?;

    let reply = test.get("/auth/oauth/authorize?provider=google").await?;
    assert_eq!(reply.status, StatusCode::SEE_OTHER);
    let location = reply
        .headers
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .context("missing Location")?;
    assert!(location.starts_with(&provider.base_url));
    let location = url::Url::parse(location)?;
    let state = crate::auth::test_support::state_param(&location).context("missing state")?;

    let callback = format!("/auth/oauth/google/callback?code={GOOD_CODE}&state={state}");
    let reply = test.get(&callback).await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["user"]["email"], "ada@example.com");
    session_token(&reply)?;

    let reply = test.get(&callback).await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["error"], "OAuth authentication failed");
    Ok(())
}

#[tokio::test]
async fn oauth_errors_over_http() -> Result<()> {
    let test = TestApp::new().await?;
    let reply = test.get("/auth/oauth/authorize?provider=github").await?;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.body["code"], "unknown_provider");

    let reply = test.get("/auth/oauth/authorize").await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);

    let reply = test
        .get("/auth/oauth/google/callback?error=access_denied&state=abc")
        .await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    Ok(())
}
