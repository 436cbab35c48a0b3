use std::sync::Arc;
use std::time::Duration;

use kiosk_pay::{SettlementEvent, SettlementNotifier, SettlementStatus};
use serde::Serialize;

/// Domain separator for the webhook signing key.
const WEBHOOK_KEY_PURPOSE: &[u8] = b"kiosk-pay-webhook-hmac";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementWebhook {
    pub event: String,
    pub id: String,
    pub order_id: String,
    pub status: SettlementStatus,
    pub timestamp: i64,
}

impl SettlementWebhook {
    pub fn from_event(event: &SettlementEvent) -> Self {
        Self {
            event: "settlement.status_changed".to_string(),
            id: event.id.clone(),
            order_id: event.order_id.clone(),
            status: event.status,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Validate that all webhook URLs parse and use HTTPS. Called at startup.
pub fn validate_webhook_urls(urls: &[String]) -> Result<(), String> {
    for raw in urls {
        let parsed = url::Url::parse(raw).map_err(|e| format!("{raw}: {e}"))?;
        if parsed.scheme() != "https" {
            return Err(format!("{raw}: webhook URLs must use https"));
        }
    }
    Ok(())
}

/// HTTP client for webhook delivery: no redirects, 5 s timeout.
pub fn webhook_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .redirect(reqwest::redirect::Policy::none())
        .build()
}

/// Derive the webhook signing key from the configured root secret.
pub fn webhook_key(secret: &[u8]) -> Vec<u8> {
    kiosk_pay::hmac::derive_key(secret, WEBHOOK_KEY_PURPOSE)
}

/// Fire-and-forget POST to each webhook URL.
/// If `hmac_key` is provided, includes an `X-Webhook-Signature` HMAC header.
pub fn fire_webhooks(
    client: &reqwest::Client,
    urls: &[String],
    webhook: &SettlementWebhook,
    hmac_key: Option<&[u8]>,
) {
    let body_bytes = match serde_json::to_vec(webhook) {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize webhook payload");
            return;
        }
    };
    let signature = hmac_key.map(|key| kiosk_pay::hmac::compute_hmac(key, &body_bytes));

    for url in urls {
        let client = client.clone();
        let url = url.clone();
        let body = body_bytes.clone();
        let signature = signature.clone();

        tokio::spawn(async move {
            let mut req = client
                .post(&url)
                .header("content-type", "application/json");
            if let Some(ref sig) = signature {
                req = req.header("X-Webhook-Signature", sig.as_str());
            }

            match req.body(body).send().await {
                Ok(resp) => {
                    tracing::debug!(url = %url, status = %resp.status(), "webhook delivered")
                }
                Err(e) => tracing::warn!(url = %url, error = %e, "webhook delivery failed"),
            }
        });
    }
}

/// Posts every settlement event to the configured webhook URLs.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    urls: Arc<Vec<String>>,
    hmac_key: Option<Vec<u8>>,
}

impl WebhookNotifier {
    pub fn new(client: reqwest::Client, urls: Vec<String>, hmac_key: Option<Vec<u8>>) -> Self {
        Self {
            client,
            urls: Arc::new(urls),
            hmac_key,
        }
    }
}

impl std::fmt::Debug for WebhookNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookNotifier")
            .field("urls", &self.urls)
            .field("hmac_key", &self.hmac_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl SettlementNotifier for WebhookNotifier {
    fn notify(&self, event: &SettlementEvent) {
        if self.urls.is_empty() {
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::warn!(settlement_id = %event.id, "no async runtime, webhook skipped");
            return;
        }
        fire_webhooks(
            &self.client,
            &self.urls,
            &SettlementWebhook::from_event(event),
            self.hmac_key.as_deref(),
        );
    }
}
