//! Outbound notification delivery.
//!
//! Delivery is an external collaborator: the engine hands an [`EmailMessage`]
//! to an [`EmailSender`] and only learns success or failure. Failures are
//! logged by the caller and never change an HTTP response.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::info;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Email delivery abstraction.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error describing why it failed.
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Local dev sender that logs instead of delivering.
#[derive(Clone, Debug, Default)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to = %message.to,
            subject = %message.subject,
            body = %message.body,
            "email send stub"
        );
        Ok(())
    }
}

/// Posts each message as JSON to an external notification service.
#[derive(Clone, Debug)]
pub struct WebhookEmailSender {
    client: reqwest::Client,
    url: String,
}

impl WebhookEmailSender {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("failed to build email webhook client")?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl EmailSender for WebhookEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        self.client
            .post(&self.url)
            .json(message)
            .send()
            .await
            .context("email webhook request failed")?
            .error_for_status()
            .context("email webhook rejected message")?;
        Ok(())
    }
}

/// Build a frontend link carrying a one-time token in the fragment.
pub(crate) fn build_token_url(frontend_base_url: &str, path: &str, token: &str) -> String {
    let base = frontend_base_url.trim_end_matches('/');
    format!("{base}/{path}#token={token}")
}

pub(crate) fn verification_message(to: &str, frontend_base_url: &str, token: &str) -> EmailMessage {
    let link = build_token_url(frontend_base_url, "verify-email", token);
    EmailMessage {
        to: to.to_string(),
        subject: "Verify your email address".to_string(),
        body: format!("Confirm your email address by opening this link within 24 hours:\n\n{link}\n"),
    }
}

pub(crate) fn password_reset_message(to: &str, frontend_base_url: &str, token: &str) -> EmailMessage {
    let link = build_token_url(frontend_base_url, "reset-password", token);
    EmailMessage {
        to: to.to_string(),
        subject: "Reset your password".to_string(),
        body: format!(
            "A password reset was requested for this address. The link below is valid for 15 minutes:\n\n{link}\n\nIgnore this message if you did not ask for it.\n"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode, routing::post};
    use std::sync::{Arc, Mutex};

    #[test]
    fn build_token_url_trims_trailing_slash() {
        assert_eq!(
            build_token_url("https://app.example.com/", "verify-email", "abc"),
            "https://app.example.com/verify-email#token=abc"
        );
    }

    #[test]
    fn messages_embed_links() {
        let message = password_reset_message("a@x.com", "https://app.example.com", "tok");
        assert_eq!(message.to, "a@x.com");
        assert!(
            message
                .body
                .contains("https://app.example.com/reset-password#token=tok")
        );
        let message = verification_message("a@x.com", "https://app.example.com", "tok");
        assert!(
            message
                .body
                .contains("https://app.example.com/verify-email#token=tok")
        );
    }

    #[tokio::test]
    async fn log_sender_always_succeeds() -> Result<()> {
        LogEmailSender
            .send(&EmailMessage {
                to: "a@x.com".to_string(),
                subject: "s".to_string(),
                body: "b".to_string(),
            })
            .await
    }

    #[tokio::test]
    async fn webhook_sender_posts_json_and_reports_rejections() -> Result<()> {
        let received: Arc<Mutex<Vec<serde_json::Value>>> = Arc::default();
        let sink = received.clone();
        let app = Router::new()
            .route(
                "/ok",
                post(move |Json(body): Json<serde_json::Value>| async move {
                    if let Ok(mut guard) = sink.lock() {
                        guard.push(body);
                    }
                    StatusCode::ACCEPTED
                }),
            )
            .route("/fail", post(|| async { StatusCode::BAD_GATEWAY }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let message = EmailMessage {
            to: "a@x.com".to_string(),
            subject: "Hello".to_string(),
            body: "World".to_string(),
        };
        let ok = WebhookEmailSender::new(format!("http://{addr}/ok"), Duration::from_secs(5))?;
        ok.send(&message).await?;
        let bodies = received.lock().map(|guard| guard.clone()).unwrap_or_default();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["subject"], "Hello");

        let failing =
            WebhookEmailSender::new(format!("http://{addr}/fail"), Duration::from_secs(5))?;
        assert!(failing.send(&message).await.is_err());
        Ok(())
    }
}
