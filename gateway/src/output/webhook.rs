//! Webhook output handler.
//!
//! Posts each transfer record as JSON to a configured URL. There is no
//! retry; a failed delivery is reported to the dispatcher, which logs it.

use super::OutputHandler;
use crate::tracker::TransferEvent;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

pub struct WebhookHandler {
    client: Client,
    url: String,
}

impl WebhookHandler {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl OutputHandler for WebhookHandler {
    async fn on_transfer(&self, event: &TransferEvent) -> anyhow::Result<()> {
        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(event)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "Webhook returned status {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            );
        }

        tracing::debug!("Posted transfer {} to webhook", event.record.operation_id);
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}
