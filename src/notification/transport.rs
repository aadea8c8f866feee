//! Built-in alert transports.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::Mutex;

use super::{Alert, AlertTransport, NotifyError, NotifyResult};

/// Posts alerts as JSON to an HTTP endpoint, typically a mail relay.
#[derive(Debug, Clone)]
pub struct WebhookTransport {
    client: Client,
    url: String,
}

impl WebhookTransport {
    /// Creates a transport posting to `url`.
    pub fn new(url: impl Into<String>) -> NotifyResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NotifyError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AlertTransport for WebhookTransport {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send_alert(&self, alert: &Alert) -> NotifyResult<()> {
        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(alert)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Keeps every alert in memory instead of sending it.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    alerts: Arc<Mutex<Vec<Alert>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Alerts received so far, oldest first.
    pub async fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().await.clone()
    }
}

#[async_trait]
impl AlertTransport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send_alert(&self, alert: &Alert) -> NotifyResult<()> {
        self.alerts.lock().await.push(alert.clone());
        Ok(())
    }
}
