//! Decoded transfers handed to output handlers.

use crate::{amount::format_amount, objects::AssetInfo};
use serde::{Deserialize, Serialize};

/// Direction of a transfer relative to the tracked account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

/// An amount with its asset resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetValue {
    pub asset_id: String,
    pub symbol: String,
    /// Exact decimal amount.
    pub amount: String,
    /// Raw integer amount.
    pub raw: i64,
}

impl AssetValue {
    pub fn new(raw: i64, asset: &AssetInfo) -> Self {
        Self {
            asset_id: asset.id.clone(),
            symbol: asset.symbol.clone(),
            amount: format_amount(raw, asset.precision),
            raw,
        }
    }
}

/// One transfer operation touching the tracked account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    /// Operation history object (`1.11.x`).
    pub operation_id: String,
    /// Position in the tracked account's history.
    pub sequence: u64,
    pub block_num: u64,
    pub trx_in_block: u32,
    pub op_in_trx: u32,
    /// Block timestamp, as reported by the node.
    pub timestamp: String,
    pub amount: AssetValue,
    pub fee: AssetValue,
    pub from_id: String,
    pub from: String,
    pub to_id: String,
    pub to: String,
    /// Decrypted memo; `None` without a memo or when it cannot be decrypted.
    pub memo: Option<String>,
    pub nonce: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub direction: Direction,
    #[serde(flatten)]
    pub record: TransferRecord,
}
