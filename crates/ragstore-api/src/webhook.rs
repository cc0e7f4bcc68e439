//! Best-effort delivery of embedding notifications to an HTTP webhook.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, error};

use ragstore_core::{defaults, EmbeddingNotification, Error, NotificationSink, Result};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying `sha256=<hex>` when a secret is configured.
pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Resolve the delivery URL: a base URL gets the embedding webhook path
/// appended, a URL already ending in `/embedding` is used as given.
pub fn normalize_webhook_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.ends_with("/embedding") {
        trimmed.to_string()
    } else {
        format!("{}{}", trimmed, defaults::WEBHOOK_EMBEDDING_PATH)
    }
}

/// HMAC-SHA256 of `body` under `secret`, hex encoded.
pub fn sign(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Posts each notification as JSON to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    secret: Option<String>,
}

impl WebhookNotifier {
    pub fn new(url: &str, secret: Option<String>) -> Result<Self> {
        Self::with_timeout(
            url,
            secret,
            Duration::from_secs(defaults::WEBHOOK_TIMEOUT_SECS),
        )
    }

    pub fn with_timeout(url: &str, secret: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build webhook client: {}", e)))?;
        Ok(Self {
            client,
            url: normalize_webhook_url(url),
            secret: secret.filter(|s| !s.is_empty()),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Deliver one notification, returning the failure instead of logging it.
    pub async fn deliver(&self, notification: &EmbeddingNotification) -> Result<()> {
        let body = serde_json::to_vec(notification)?;

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json");
        if let Some(secret) = &self.secret {
            if let Some(signature) = sign(secret, &body) {
                request = request.header(SIGNATURE_HEADER, format!("sha256={}", signature));
            }
        }

        let response = request.body(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Request(format!(
                "Webhook returned {}: {}",
                status, text
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn notify(&self, notification: EmbeddingNotification) {
        let start = Instant::now();
        match self.deliver(&notification).await {
            Ok(()) => debug!(
                subsystem = "notify",
                component = "webhook",
                file_id = %notification.file_id,
                namespace = %notification.namespace,
                embedded = notification.embedded,
                duration_ms = start.elapsed().as_millis() as u64,
                "Webhook delivered"
            ),
            Err(e) => error!(
                subsystem = "notify",
                component = "webhook",
                file_id = %notification.file_id,
                namespace = %notification.namespace,
                url = %self.url,
                error = %e,
                "Webhook delivery failed"
            ),
        }
    }
}

/// Deliver `notification` on a background task so the caller never waits
/// on the receiver.
pub fn notify_detached(sink: Arc<dyn NotificationSink>, notification: EmbeddingNotification) {
    tokio::spawn(async move {
        sink.notify(notification).await;
    });
}
