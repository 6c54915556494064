//! Chain objects as returned by the node.
//!
//! Only the fields the gateway reads are modelled; unknown fields are ignored.

use crate::{
    authority::Permission,
    error::{Error, Result},
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Instance number of an object id such as `1.2.17`.
pub fn object_instance(id: &str) -> Result<u64> {
    let mut parts = id.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(space), Some(kind), Some(instance), None)
            if space.parse::<u8>().is_ok() && kind.parse::<u8>().is_ok() =>
        {
            instance
                .parse()
                .map_err(|_| Error::validation(format!("invalid object id {}", id)))
        }
        _ => Err(Error::validation(format!("invalid object id {}", id))),
    }
}

/// Whether `id` looks like a protocol object id rather than a name or symbol.
pub fn is_object_id(id: &str) -> bool {
    object_instance(id).is_ok()
}

/// Node integers arrive as JSON numbers or, when large, as strings.
pub mod flexible {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Signed(i64),
        Unsigned(u64),
        Text(String),
    }

    pub fn i64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Signed(v) => Ok(v),
            Repr::Unsigned(v) => i64::try_from(v).map_err(serde::de::Error::custom),
            Repr::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }

    pub fn u64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Signed(v) => u64::try_from(v).map_err(serde::de::Error::custom),
            Repr::Unsigned(v) => Ok(v),
            Repr::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// An amount of some asset in raw (integer) units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetAmount {
    #[serde(deserialize_with = "flexible::i64")]
    pub amount: i64,
    pub asset_id: String,
}

impl AssetAmount {
    pub fn new(amount: i64, asset_id: impl Into<String>) -> Self {
        Self {
            amount,
            asset_id: asset_id.into(),
        }
    }
}

/// Weighted threshold authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authority {
    pub weight_threshold: u32,

    /// `(account id, weight)` pairs.
    #[serde(default)]
    pub account_auths: Vec<(String, u16)>,

    /// `(public key, weight)` pairs.
    #[serde(default)]
    pub key_auths: Vec<(String, u16)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOptions {
    pub memo_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub owner: Authority,
    pub active: Authority,
    pub options: AccountOptions,
    /// Id of the account's statistics object (`2.6.x`).
    pub statistics: String,
}

impl Account {
    pub fn authority(&self, permission: Permission) -> &Authority {
        match permission {
            Permission::Owner => &self.owner,
            Permission::Active => &self.active,
        }
    }
}

/// Per-account statistics object, pushed whenever the account sees a new operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountStatistics {
    pub id: String,
    pub owner: String,
    /// Newest account history entry (`2.9.x`).
    pub most_recent_op: String,
    #[serde(default)]
    pub total_ops: u64,
    #[serde(default)]
    pub removed_ops: u64,
}

/// Node in the per-account history list, newest first via `next`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub account: String,
    /// Operation history object (`1.11.x`).
    pub operation_id: String,
    pub sequence: u64,
    /// Next older entry.
    #[serde(default)]
    pub next: String,
}

/// A historical operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationHistory {
    pub id: String,
    /// `[tag, body]`
    pub op: (u16, Value),
    #[serde(default)]
    pub block_num: u64,
    #[serde(default)]
    pub trx_in_block: u32,
    #[serde(default)]
    pub op_in_trx: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub base: AssetAmount,
    pub quote: AssetAmount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetOptions {
    pub core_exchange_rate: Price,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetInfo {
    pub id: String,
    pub symbol: String,
    pub precision: u8,
    pub options: AssetOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicGlobalProperties {
    pub head_block_number: u32,
    pub head_block_id: String,
    #[serde(default)]
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub timestamp: String,
    #[serde(default)]
    pub witness: String,
}

/// `parameters.current_fees` of the global properties object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// `[operation tag, fee parameters]`
    pub parameters: Vec<(u16, Value)>,
    pub scale: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainParameters {
    pub current_fees: FeeSchedule,
}

/// Global properties object `2.0.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalProperties {
    pub parameters: ChainParameters,
}
