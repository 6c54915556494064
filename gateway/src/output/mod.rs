//! Output handlers for tracked transfers.
//!
//! - Log (one line per transfer)
//! - Webhook (HTTP POST of the record JSON)
//!
//! Delivery failures are logged and dropped.

mod log;
mod webhook;

pub use log::LogHandler;
pub use webhook::WebhookHandler;

use crate::tracker::TransferEvent;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Trait for transfer output handlers.
#[async_trait]
pub trait OutputHandler: Send + Sync {
    /// Handle one transfer.
    async fn on_transfer(&self, event: &TransferEvent) -> anyhow::Result<()>;

    /// Short name used in logs.
    fn name(&self) -> &str;
}

/// Log handler, plus a webhook handler when `webhook_url` is set.
pub fn create_handlers(webhook_url: Option<&str>) -> anyhow::Result<Vec<Box<dyn OutputHandler>>> {
    let mut handlers: Vec<Box<dyn OutputHandler>> = vec![Box::new(LogHandler::new())];
    if let Some(url) = webhook_url {
        handlers.push(Box::new(WebhookHandler::new(url)?));
    }
    Ok(handlers)
}

/// Hand every event to every handler, in order, until the sender side closes.
pub async fn dispatch(mut events: mpsc::Receiver<TransferEvent>, handlers: Vec<Box<dyn OutputHandler>>) {
    while let Some(event) = events.recv().await {
        for handler in &handlers {
            if let Err(e) = handler.on_transfer(&event).await {
                tracing::warn!(
                    "{} handler failed for operation {}: {}",
                    handler.name(),
                    event.record.operation_id,
                    e
                );
            }
        }
    }
    tracing::debug!("Transfer event stream ended");
}
