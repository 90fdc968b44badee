//! Progress notifications

use async_trait::async_trait;
use tracing::{debug, warn};

/// Receiver of human-readable progress messages
///
/// Delivery is best effort; implementations never fail the caller.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str);
}

/// Posts `{"content": message}` to a webhook URL
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, message: &str) {
        let body = serde_json::json!({ "content": message });
        match self.client.post(&self.url).json(&body).send().await {
            Ok(response) if response.status().is_success() => debug!("Webhook delivered"),
            Ok(response) => warn!(status = %response.status(), "Webhook rejected message"),
            Err(e) => warn!(error = %e, "Failed to deliver webhook message"),
        }
    }
}
