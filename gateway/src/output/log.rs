//! Log output handler.

use super::OutputHandler;
use crate::tracker::{Direction, TransferEvent};
use async_trait::async_trait;

/// Handler that logs one line per transfer.
#[derive(Debug, Default)]
pub struct LogHandler;

impl LogHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl OutputHandler for LogHandler {
    async fn on_transfer(&self, event: &TransferEvent) -> anyhow::Result<()> {
        let record = &event.record;
        let memo = record.memo.as_deref().unwrap_or("-");
        match event.direction {
            Direction::Sent => tracing::info!(
                "Sent {} {} to {}, block {}, memo: {}",
                record.amount.amount,
                record.amount.symbol,
                record.to,
                record.block_num,
                memo
            ),
            Direction::Received => tracing::info!(
                "Received {} {} from {}, block {}, memo: {}",
                record.amount.amount,
                record.amount.symbol,
                record.from,
                record.block_num,
                memo
            ),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}
