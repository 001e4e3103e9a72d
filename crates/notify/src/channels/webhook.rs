//! HTTP webhook status channel.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::ChannelError;
use crate::events::StatusUpdate;
use crate::NotifyChannel;

/// Posts status updates as JSON to a caller-supplied endpoint.
pub struct WebhookChannel {
    endpoint: Option<String>,
    client: reqwest::Client,
}

impl WebhookChannel {
    /// Create a webhook channel. A blank endpoint leaves the channel disabled.
    #[must_use]
    pub fn new(endpoint: &str) -> Self {
        let endpoint = Some(endpoint.trim())
            .filter(|e| !e.is_empty())
            .map(str::to_string);

        if endpoint.is_none() {
            debug!("Webhook endpoint empty, status updates will not be sent");
        }

        Self {
            endpoint,
            client: reqwest::Client::new(),
        }
    }

    #[must_use]
    pub fn with_client(endpoint: &str, client: reqwest::Client) -> Self {
        Self {
            client,
            ..Self::new(endpoint)
        }
    }
}

#[async_trait]
impl NotifyChannel for WebhookChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    async fn send(&self, update: &StatusUpdate) -> Result<(), ChannelError> {
        let endpoint = self
            .endpoint
            .as_ref()
            .ok_or_else(|| ChannelError::NotConfigured("webhookEndpoint".to_string()))?;

        debug!(
            channel = "webhook",
            status = %update.data.status,
            "Sending status update"
        );

        let response = self.client.post(endpoint).json(update).send().await?;

        if response.status().is_success() {
            debug!(channel = "webhook", status = %response.status(), "Status update delivered");
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            warn!(
                channel = "webhook",
                status = %status,
                body = %body,
                "Webhook request failed"
            );

            Err(ChannelError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}
