//! Shared fixtures for engine and HTTP tests.

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    Form, Json, Router,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
};
use std::time::Duration;

use super::{
    clock::ManualClock,
    email::{EmailMessage, EmailSender},
    state::{AuthConfig, AuthState},
};
use crate::{
    store::{AuthStore, MemoryStore, OAuthProviderRecord},
    tenant::Tenant,
};

pub const FRONTEND: &str = "https://app.example.com";
pub const GOOD_CODE: &str = "good-code";
pub const CLIENT_SECRET: &str = "client-secret";
pub const ACCESS_TOKEN: &str = "at-1";

/// 2026-01-01T00:00:00Z
pub fn start_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_767_225_600, 0).unwrap_or_default()
}

#[derive(Default)]
pub struct RecordingEmailSender {
    messages: Mutex<Vec<EmailMessage>>,
    fail: AtomicBool,
}

impl RecordingEmailSender {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.messages
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }

    /// Token embedded in the most recent message's link.
    pub fn last_token(&self) -> Option<String> {
        let last = self.sent().pop()?;
        let (_, rest) = last.body.split_once("#token=")?;
        rest.split_whitespace().next().map(str::to_string)
    }
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("smtp relay unreachable");
        }
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message.clone());
        }
        Ok(())
    }
}

pub struct Harness {
    pub state: Arc<AuthState>,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub emails: Arc<RecordingEmailSender>,
    pub tenant: Tenant,
}

impl Harness {
    /// Engine over a memory store serving tenants `t1` and `t2`.
    pub async fn new() -> Result<Self> {
        Self::with_config(|config| config).await
    }

    /// Only `t1` and `t2` are provisioned, whatever `customize` adds.
    pub async fn with_config(customize: impl FnOnce(AuthConfig) -> AuthConfig) -> Result<Self> {
        let tenants = vec![Tenant::parse("t1")?, Tenant::parse("t2")?];
        let store = Arc::new(MemoryStore::new());
        for tenant in &tenants {
            store.provision_tenant(tenant).await?;
        }
        let config = customize(AuthConfig::new(FRONTEND.to_string(), tenants));
        let clock = Arc::new(ManualClock::new(start_time()));
        let emails = Arc::new(RecordingEmailSender::default());
        let state = AuthState::new(config, store.clone())?
            .with_clock(clock.clone())
            .with_email_sender(emails.clone());
        Ok(Self {
            state: Arc::new(state),
            store,
            clock,
            emails,
            tenant: Tenant::parse("t1")?,
        })
    }

    pub fn other_tenant(&self) -> Result<Tenant> {
        Ok(Tenant::parse("t2")?)
    }
}

/// A tiny OAuth provider answering the token and user-info endpoints.
pub struct FakeProvider {
    pub base_url: String,
    pub token_calls: Arc<AtomicUsize>,
    pub token_delay_ms: Arc<AtomicU64>,
    pub user: Arc<Mutex<Value>>,
}

impl FakeProvider {
    pub async fn spawn() -> Result<Self> {
        let token_calls = Arc::new(AtomicUsize::new(0));
        let token_delay_ms = Arc::new(AtomicU64::new(0));
        let user = Arc::new(Mutex::new(json!({
            "sub": "provider-user-1",
            "email": "ada@example.com",
            "email_verified": true,
            "given_name": "Ada",
            "family_name": "Lovelace"
        })));

        let calls = token_calls.clone();
        let delay_ms = token_delay_ms.clone();
        let document = user.clone();
        let app = Router::new()
            .route(
                "/token",
                post(move |Form(form): Form<HashMap<String, String>>| {
                    let calls = calls.clone();
                    let delay = Duration::from_millis(delay_ms.load(Ordering::SeqCst));
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(delay).await;
                        let field = |key: &str| form.get(key).map(String::as_str);
                        if field("grant_type") == Some("authorization_code")
                            && field("code") == Some(GOOD_CODE)
                            && field("client_secret") == Some(CLIENT_SECRET)
                        {
                            (
                                StatusCode::OK,
                                Json(json!({
                                    "access_token": ACCESS_TOKEN,
                                    "refresh_token": "rt-1",
                                    "expires_in": 3600,
                                    "token_type": "bearer"
                                })),
                            )
                        } else {
                            (
                                StatusCode::BAD_REQUEST,
                                Json(json!({"error": "invalid_grant"})),
                            )
                        }
                    }
                }),
            )
            .route(
                "/userinfo",
                get(move |headers: HeaderMap| {
                    let document = document.clone();
                    async move {
                        let bearer = headers
                            .get(AUTHORIZATION)
                            .and_then(|value| value.to_str().ok())
                            .map(str::to_string);
                        if bearer.as_deref() != Some("Bearer at-1") {
                            return (StatusCode::UNAUTHORIZED, Json(json!({"error": "denied"})));
                        }
                        let body = document
                            .lock()
                            .map(|doc| doc.clone())
                            .unwrap_or(Value::Null);
                        (StatusCode::OK, Json(body))
                    }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self {
            base_url: format!("http://{addr}"),
            token_calls,
            token_delay_ms,
            user,
        })
    }

    pub fn set_user(&self, document: Value) {
        if let Ok(mut user) = self.user.lock() {
            *user = document;
        }
    }

    /// Make the token endpoint stall before answering.
    pub fn set_token_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.token_delay_ms.store(millis, Ordering::SeqCst);
    }

    pub fn token_calls(&self) -> usize {
        self.token_calls.load(Ordering::SeqCst)
    }

    pub fn record(&self, name: &str) -> OAuthProviderRecord {
        OAuthProviderRecord {
            name: name.to_string(),
            client_id: "client-1".to_string(),
            client_secret: SecretString::from(CLIENT_SECRET.to_string()),
            redirect_uri: format!("https://t1.auth.example.com/auth/oauth/{name}/callback"),
            scope: None,
            enabled: true,
            authorize_url: Some(format!("{}/authorize", self.base_url)),
            token_url: Some(format!("{}/token", self.base_url)),
            user_info_url: Some(format!("{}/userinfo", self.base_url)),
        }
    }
}

/// Pull the `state` query parameter out of an authorization URL.
pub fn state_param(url: &url::Url) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == "state")
        .map(|(_, value)| value.into_owned())
}
