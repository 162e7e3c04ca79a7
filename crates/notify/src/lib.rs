//! Chat notifications via the Telegram bot API.
//!
//! Strictly fire-and-forget: the trading path never awaits a notification
//! and every failure is logged and swallowed. Without a token the notifier
//! is inert.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug)]
struct Inner {
    http: reqwest::Client,
    url: String,
    chat_id: String,
}

/// Cloneable handle to the notification sink.
#[derive(Debug, Clone)]
pub struct Notifier {
    inner: Option<Arc<Inner>>,
}

impl Notifier {
    /// Builds a notifier; `None` credentials disable it.
    #[must_use]
    pub fn new(bot_token: Option<String>, chat_id: Option<String>) -> Self {
        let inner = match (bot_token, chat_id) {
            (Some(token), Some(chat_id)) if !token.is_empty() && !chat_id.is_empty() => {
                let http = reqwest::Client::builder()
                    .timeout(Duration::from_secs(10))
                    .build()
                    .ok();
                http.map(|http| {
                    Arc::new(Inner {
                        http,
                        url: format!("https://api.telegram.org/bot{token}/sendMessage"),
                        chat_id,
                    })
                })
            }
            _ => None,
        };
        if inner.is_none() {
            debug!("Notifier disabled (no Telegram credentials)");
        }
        Self { inner }
    }

    /// An always-silent notifier (tests, disabled deployments).
    #[must_use]
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Overrides the endpoint URL (tests).
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        if let Some(inner) = self.inner.take() {
            self.inner = Some(Arc::new(Inner {
                http: inner.http.clone(),
                url: url.into(),
                chat_id: inner.chat_id.clone(),
            }));
        }
        self
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Sends a message on a detached task; the caller never waits.
    pub fn send(&self, text: impl Into<String>) {
        let Some(inner) = self.inner.clone() else { return };
        let text = text.into();
        tokio::spawn(async move {
            deliver(&inner, &text).await;
        });
    }

    /// Sends a message and waits for delivery; used at startup/shutdown
    /// where the process may exit right after.
    pub async fn send_now(&self, text: impl Into<String>) {
        let Some(inner) = self.inner.clone() else { return };
        deliver(&inner, &text.into()).await;
    }
}

async fn deliver(inner: &Inner, text: &str) {
    let result = inner
        .http
        .post(&inner.url)
        .json(&json!({ "chat_id": inner.chat_id, "text": text }))
        .send()
        .await;
    match result {
        Ok(response) if response.status().is_success() => {}
        Ok(response) => warn!(status = %response.status(), "Notification rejected"),
        Err(e) => warn!(error = %e, "Notification send failed"),
    }
}
